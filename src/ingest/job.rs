//! In-memory FIFO ingestion queue (§4.11): one worker, one process. The
//! queue owns `Job` state so `GET /job/{id}` can poll progress without the
//! caller holding a reference to the in-flight future.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{Job, JobStage, JobStatus};

/// One unit of ingestion work: raw bytes plus the metadata the pipeline
/// needs to dispatch a reader and decide OCR.
pub struct IngestPayload {
    pub job_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub use_ocr: bool,
}

pub struct JobQueue {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    sender: mpsc::UnboundedSender<IngestPayload>,
}

impl JobQueue {
    /// Spawns the single worker task that drains the channel in submission
    /// order, calling `process` for each payload and updating job state from
    /// the `JobProgress` handle it receives.
    pub fn spawn<F, Fut>(process: F) -> Self
    where
        F: Fn(IngestPayload, JobProgress) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let jobs: Arc<RwLock<HashMap<String, Job>>> = Arc::new(RwLock::new(HashMap::new()));
        let (sender, mut receiver) = mpsc::unbounded_channel::<IngestPayload>();

        let worker_jobs = jobs.clone();
        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                let progress = JobProgress {
                    job_id: payload.job_id.clone(),
                    jobs: worker_jobs.clone(),
                };
                progress.set_status(JobStatus::Processing);
                process(payload, progress).await;
            }
        });

        Self { jobs, sender }
    }

    /// Enqueues a document and returns the job id immediately; actual
    /// extraction/chunking/embedding happens on the worker task.
    pub fn add(&self, filename: impl Into<String>, bytes: Vec<u8>, use_ocr: bool) -> String {
        let job_id = Uuid::new_v4().to_string();
        self.jobs.write().insert(job_id.clone(), Job::new(job_id.clone()));

        let payload = IngestPayload {
            job_id: job_id.clone(),
            filename: filename.into(),
            bytes,
            use_ocr,
        };
        // The worker task owns the receiver for the lifetime of the process;
        // a send error would mean it panicked, which is a bug, not a queue
        // condition callers should handle.
        let _ = self.sender.send(payload);
        job_id
    }

    pub fn get_status(&self, id: &str) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    pub fn size(&self) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Processing))
            .count()
    }
}

/// Handle the worker passes to the pipeline so it can report stage/progress
/// without taking a lock on the whole queue for every update.
#[derive(Clone)]
pub struct JobProgress {
    job_id: String,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobProgress {
    pub fn set_status(&self, status: JobStatus) {
        if let Some(job) = self.jobs.write().get_mut(&self.job_id) {
            job.status = status;
        }
    }

    pub fn set_stage(&self, stage: JobStage, progress: u8) {
        if let Some(job) = self.jobs.write().get_mut(&self.job_id) {
            job.stage = stage;
            job.progress = progress;
        }
    }

    pub fn set_ocr_progress(&self, page: u32, total: u32) {
        if let Some(job) = self.jobs.write().get_mut(&self.job_id) {
            job.ocr_page = Some(page);
            job.ocr_total_pages = Some(total);
        }
    }

    pub fn complete(&self) {
        if let Some(job) = self.jobs.write().get_mut(&self.job_id) {
            job.status = JobStatus::Completed;
            job.stage = JobStage::Done;
            job.progress = 100;
            job.completed_at = Some(chrono::Utc::now().to_rfc3339());
        }
    }

    pub fn fail(&self, error: impl Into<String>) {
        if let Some(job) = self.jobs.write().get_mut(&self.job_id) {
            job.status = JobStatus::Failed;
            job.error = Some(error.into());
            job.completed_at = Some(chrono::Utc::now().to_rfc3339());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn add_returns_id_and_status_becomes_completed() {
        let queue = JobQueue::spawn(|_payload, progress| async move {
            progress.set_stage(JobStage::Extracting, 10);
            progress.complete();
        });

        let id = queue.add("doc.txt", b"hola".to_vec(), false);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn unknown_id_returns_none() {
        let queue = JobQueue::spawn(|_payload, progress| async move {
            progress.complete();
        });
        assert!(queue.get_status("not-a-real-id").is_none());
    }

    #[tokio::test]
    async fn failed_job_records_error_message() {
        let queue = JobQueue::spawn(|_payload, progress| async move {
            progress.fail("extraction failed");
        });
        let id = queue.add("doc.pdf", vec![], false);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("extraction failed"));
    }
}
