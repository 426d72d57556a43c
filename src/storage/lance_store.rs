//! LanceDB-backed storage for one collection (Regular or QnA). The dual
//! collection design (§3) is two instances of this store, wired together by
//! `search::client::HybridSearchClient`.

use anyhow::{Context, Result};
use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use crate::types::Chunk;

pub struct LanceStore {
    db: lancedb::Connection,
    dimension: usize,
    table_name: String,
}

impl LanceStore {
    pub async fn new(path: &str, table_name: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("failed to connect to LanceDB")?;

        let store = Self {
            db,
            dimension,
            table_name: table_name.to_string(),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("source_name", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("total_chunks", DataType::UInt32, false),
            Field::new("page_number", DataType::UInt32, true),
            Field::new("source_namespace", DataType::Utf8, false),
            Field::new("upload_date", DataType::Utf8, false),
            Field::new("language", DataType::Utf8, false),
            Field::new("content_without_overlap", DataType::Utf8, false),
            Field::new("is_qa_pair", DataType::Boolean, false),
            Field::new("question_text", DataType::Utf8, true),
            Field::new("start_position", DataType::UInt32, false),
            Field::new("end_position", DataType::UInt32, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
        ]))
    }

    pub async fn ensure_table(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            return Ok(());
        }

        let schema = self.schema();
        let seed = Chunk {
            text: String::new(),
            source_name: "__seed__".to_string(),
            chunk_index: 0,
            total_chunks: 0,
            prev_chunk_index: None,
            next_chunk_index: None,
            page_number: None,
            source_namespace: String::new(),
            upload_date: String::new(),
            language: String::new(),
            content_without_overlap: String::new(),
            is_qa_pair: false,
            question_text: None,
            start_position: 0,
            end_position: 0,
        };
        let batch = self.build_batch(&[("__seed__".to_string(), seed, vec![0.0f32; self.dimension])])?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(&self.table_name, Box::new(batches))
            .execute()
            .await
            .context("failed to create table")?;

        let table = self.db.open_table(&self.table_name).execute().await?;
        table.delete("source_name = '__seed__'").await.ok();
        Ok(())
    }

    fn build_batch(&self, rows: &[(String, Chunk, Vec<f32>)]) -> Result<RecordBatch> {
        let schema = self.schema();

        let ids: Vec<&str> = rows.iter().map(|(id, _, _)| id.as_str()).collect();
        let texts: Vec<&str> = rows.iter().map(|(_, c, _)| c.text.as_str()).collect();
        let source_names: Vec<&str> = rows.iter().map(|(_, c, _)| c.source_name.as_str()).collect();
        let chunk_indices: Vec<u32> = rows.iter().map(|(_, c, _)| c.chunk_index).collect();
        let total_chunks: Vec<u32> = rows.iter().map(|(_, c, _)| c.total_chunks).collect();
        let page_numbers: Vec<Option<u32>> = rows.iter().map(|(_, c, _)| c.page_number).collect();
        let namespaces: Vec<&str> = rows.iter().map(|(_, c, _)| c.source_namespace.as_str()).collect();
        let upload_dates: Vec<&str> = rows.iter().map(|(_, c, _)| c.upload_date.as_str()).collect();
        let languages: Vec<&str> = rows.iter().map(|(_, c, _)| c.language.as_str()).collect();
        let content_without_overlap: Vec<&str> =
            rows.iter().map(|(_, c, _)| c.content_without_overlap.as_str()).collect();
        let is_qa: Vec<bool> = rows.iter().map(|(_, c, _)| c.is_qa_pair).collect();
        let question_texts: Vec<Option<&str>> =
            rows.iter().map(|(_, c, _)| c.question_text.as_deref()).collect();
        let start_positions: Vec<u32> = rows.iter().map(|(_, c, _)| c.start_position).collect();
        let end_positions: Vec<u32> = rows.iter().map(|(_, c, _)| c.end_position).collect();

        let flat_vectors: Vec<f32> = rows.iter().flat_map(|(_, _, v)| v.iter().copied()).collect();
        let values = Float32Array::from(flat_vectors);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(source_names)),
                Arc::new(UInt32Array::from(chunk_indices)),
                Arc::new(UInt32Array::from(total_chunks)),
                Arc::new(UInt32Array::from(page_numbers)),
                Arc::new(StringArray::from(namespaces)),
                Arc::new(StringArray::from(upload_dates)),
                Arc::new(StringArray::from(languages)),
                Arc::new(StringArray::from(content_without_overlap)),
                Arc::new(BooleanArray::from(is_qa)),
                Arc::new(StringArray::from(question_texts)),
                Arc::new(UInt32Array::from(start_positions)),
                Arc::new(UInt32Array::from(end_positions)),
                Arc::new(vector_array) as Arc<dyn Array>,
            ],
        )
        .context("failed to build record batch")
    }

    /// Insert chunks with pre-computed embeddings. `rows` is `(id, chunk, vector)`.
    pub async fn insert_batch(&self, rows: Vec<(String, Chunk, Vec<f32>)>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for (_, _, vector) in &rows {
            if vector.len() != self.dimension {
                anyhow::bail!(
                    "vector dimensionality mismatch: expected {} got {}",
                    self.dimension,
                    vector.len()
                );
            }
        }

        let table = self.db.open_table(&self.table_name).execute().await?;
        let schema = self.schema();
        let batch = self.build_batch(&rows)?;
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("failed to insert chunks")?;
        tracing::debug!(table = %self.table_name, count = rows.len(), "inserted chunks");
        Ok(())
    }

    pub async fn delete_by_filter(&self, field: &str, value: &str) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let before = table.count_rows(None).await.unwrap_or(0);
        let predicate = format!("{field} = '{}'", value.replace('\'', "''"));
        table.delete(&predicate).await?;
        let after = table.count_rows(None).await.unwrap_or(0);
        Ok(before - after)
    }

    pub async fn vector_search(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let results = table
            .query()
            .nearest_to(embedding)?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("vector search failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits(&batches))
    }

    pub async fn get_by_source_and_index(
        &self,
        source_name: &str,
        chunk_index: u32,
    ) -> Result<Option<SearchHit>> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let predicate = format!(
            "source_name = '{}' AND chunk_index = {}",
            source_name.replace('\'', "''"),
            chunk_index
        );
        let results = table
            .query()
            .only_if(predicate)
            .limit(1)
            .execute()
            .await
            .context("exact fetch failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits(&batches).into_iter().next())
    }

    pub async fn get_neighbors(
        &self,
        source_name: &str,
        chunk_index: u32,
        window: u32,
    ) -> Result<Vec<SearchHit>> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let low = chunk_index.saturating_sub(window);
        let high = chunk_index.saturating_add(window);
        let predicate = format!(
            "source_name = '{}' AND chunk_index >= {} AND chunk_index <= {} AND chunk_index != {}",
            source_name.replace('\'', "''"),
            low,
            high,
            chunk_index
        );
        let results = table
            .query()
            .only_if(predicate)
            .execute()
            .await
            .context("neighbor lookup failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        let mut hits = extract_hits(&batches);
        hits.sort_by_key(|h| h.chunk.chunk_index);
        Ok(hits)
    }

    pub async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<SearchHit>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut all = Vec::new();
        for chunk in ids.chunks(50) {
            let list: Vec<String> = chunk
                .iter()
                .map(|id| format!("'{}'", id.replace('\'', "''")))
                .collect();
            let predicate = format!("id IN ({})", list.join(", "));
            let results = table
                .query()
                .only_if(predicate)
                .execute()
                .await
                .context("id lookup failed")?;
            let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
            all.extend(extract_hits(&batches));
        }
        Ok(all)
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        Ok(table.count_rows(None).await?)
    }

    pub async fn clear(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            self.db.drop_table(&self.table_name, &[]).await?;
        }
        self.ensure_table().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub chunk: Chunk,
    pub score: f32,
}

fn extract_hits(batches: &[RecordBatch]) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = col_str(batch, "id");
        let texts = col_str(batch, "text");
        let source_names = col_str(batch, "source_name");
        let chunk_indices = col_u32(batch, "chunk_index");
        let total_chunks = col_u32(batch, "total_chunks");
        let page_numbers = col_u32(batch, "page_number");
        let namespaces = col_str(batch, "source_namespace");
        let upload_dates = col_str(batch, "upload_date");
        let languages = col_str(batch, "language");
        let content_without_overlap = col_str(batch, "content_without_overlap");
        let is_qa = batch
            .column_by_name("is_qa_pair")
            .and_then(|c| c.as_any().downcast_ref::<BooleanArray>());
        let question_texts = col_str(batch, "question_text");
        let start_positions = col_u32(batch, "start_position");
        let end_positions = col_u32(batch, "end_position");
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(texts), Some(source_names)) = (ids, texts, source_names) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let source_name = source_names.value(i).to_string();
            if source_name == "__seed__" {
                continue;
            }
            let score = distances.map(|d| (1.0 - d.value(i)).max(0.0)).unwrap_or(0.0);
            let chunk_index = chunk_indices.as_ref().map(|c| c.value(i)).unwrap_or(0);
            let chunk = Chunk {
                text: texts.value(i).to_string(),
                source_name,
                chunk_index,
                total_chunks: total_chunks.as_ref().map(|c| c.value(i)).unwrap_or(0),
                prev_chunk_index: chunk_index.checked_sub(1),
                next_chunk_index: Some(chunk_index + 1),
                page_number: page_numbers
                    .as_ref()
                    .and_then(|c| if c.is_null(i) { None } else { Some(c.value(i)) }),
                source_namespace: namespaces.as_ref().map(|c| c.value(i).to_string()).unwrap_or_default(),
                upload_date: upload_dates.as_ref().map(|c| c.value(i).to_string()).unwrap_or_default(),
                language: languages.as_ref().map(|c| c.value(i).to_string()).unwrap_or_default(),
                content_without_overlap: content_without_overlap
                    .as_ref()
                    .map(|c| c.value(i).to_string())
                    .unwrap_or_default(),
                is_qa_pair: is_qa.map(|c| c.value(i)).unwrap_or(false),
                question_text: question_texts
                    .as_ref()
                    .and_then(|c| if c.is_null(i) { None } else { Some(c.value(i).to_string()) }),
                start_position: start_positions.as_ref().map(|c| c.value(i)).unwrap_or(0),
                end_position: end_positions.as_ref().map(|c| c.value(i)).unwrap_or(0),
            };
            hits.push(SearchHit {
                id: ids.value(i).to_string(),
                chunk,
                score,
            });
        }
    }
    hits
}

fn col_str<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch.column_by_name(name)?.as_any().downcast_ref::<StringArray>()
}

fn col_u32<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a UInt32Array> {
    batch.column_by_name(name)?.as_any().downcast_ref::<UInt32Array>()
}
