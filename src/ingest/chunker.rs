//! Chunking (§4.11 step 2): FAQ-aware splitting with a recursive fallback
//! for ordinary prose. Adapted from the teacher's `TextChunker`
//! break-point search, generalized to also emit the `isQAPair` /
//! `contentWithoutOverlap` metadata the retrieval pipeline depends on.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::ChunkingConfig;

static QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"¿[^?]+\?").unwrap());

pub struct RawChunk {
    pub text: String,
    pub content_without_overlap: String,
    pub is_qa_pair: bool,
    pub question_text: Option<String>,
    pub start_position: u32,
    pub end_position: u32,
}

/// Dispatches to the Q&A-aware chunker when the document looks like an FAQ
/// (by filename hint or by structural pair detection), otherwise falls
/// through to the recursive character-budget chunker.
pub fn chunk_document(text: &str, filename: &str, config: &ChunkingConfig) -> Vec<RawChunk> {
    if filename.to_uppercase().contains("QNA") || looks_like_faq(text, config) {
        let pairs = chunk_qna_pairs(text, config);
        if !pairs.is_empty() {
            return pairs;
        }
    }
    chunk_recursive(text, config)
}

/// Pair count/coverage over `find_question_spans`' own span boundaries,
/// rather than a second lookahead-based pattern — `regex` has no lookaround,
/// and the span scan below already walks `¿...?` to the next question (or
/// end of document) as each pair's extent.
fn looks_like_faq(text: &str, config: &ChunkingConfig) -> bool {
    let spans = find_question_spans(text);
    if spans.len() < config.qna_min_pairs {
        return false;
    }
    let covered: usize = spans.iter().map(|s| s.answer_end - s.question_start).sum();
    let coverage = covered as f32 / text.len().max(1) as f32;
    coverage >= config.qna_min_coverage
}

/// Each `¿pregunta? respuesta` pair becomes one atomic chunk. Answers over
/// `qna_max_answer_chars` are skipped rather than truncated, since a partial
/// answer is worse than no answer for an FAQ-style lookup.
fn chunk_qna_pairs(text: &str, config: &ChunkingConfig) -> Vec<RawChunk> {
    let mut out = Vec::new();
    let mut cursor = 0usize;

    for question_match in find_question_spans(text) {
        let question = question_match.question.trim();
        let answer_start = question_match.answer_start;
        let answer_end = question_match.answer_end;
        let answer = text[answer_start..answer_end].trim();

        if answer.is_empty() || answer.len() > config.qna_max_answer_chars {
            cursor = answer_end;
            continue;
        }

        let full = format!("{question} {answer}");
        out.push(RawChunk {
            content_without_overlap: full.clone(),
            text: full,
            is_qa_pair: true,
            question_text: Some(question.to_string()),
            start_position: question_match.question_start as u32,
            end_position: answer_end as u32,
        });
        cursor = answer_end;
    }

    let _ = cursor;
    out
}

struct QuestionSpan {
    question_start: usize,
    question: String,
    answer_start: usize,
    answer_end: usize,
}

/// Finds every `¿...?` question and assigns it the text up to the next
/// question (or end of document) as its answer span.
fn find_question_spans(text: &str) -> Vec<QuestionSpan> {
    let starts: Vec<(usize, usize, String)> = QUESTION_RE
        .find_iter(text)
        .map(|m| (m.start(), m.end(), m.as_str().to_string()))
        .collect();

    let mut spans = Vec::new();
    for (i, (start, end, question)) in starts.iter().enumerate() {
        let answer_end = starts.get(i + 1).map(|(next_start, ..)| *next_start).unwrap_or(text.len());
        spans.push(QuestionSpan {
            question_start: *start,
            question: question.clone(),
            answer_start: *end,
            answer_end,
        });
    }
    spans
}

const SPLIT_HIERARCHY: [&str; 4] = ["\n\n", "\n", ". ", ", "];

/// Recursive splitter: tries each separator in `SPLIT_HIERARCHY` in turn,
/// falling back to a hard cut on whitespace, to keep chunks close to
/// `chunk_size` without breaking mid-sentence when avoidable.
fn chunk_recursive(text: &str, config: &ChunkingConfig) -> Vec<RawChunk> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let chars: Vec<char> = text.chars().collect();

    while start < chars.len() {
        let tentative_end = (start + config.chunk_size).min(chars.len());
        let end = if tentative_end == chars.len() {
            tentative_end
        } else {
            find_break_point(&chars, start, tentative_end)
        };

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            let overlap_free_start = if start == 0 { 0 } else { config.chunk_overlap.min(piece.len()) };
            let content_without_overlap: String = piece.chars().skip(overlap_free_start).collect();
            out.push(RawChunk {
                text: trimmed.to_string(),
                content_without_overlap: content_without_overlap.trim().to_string(),
                is_qa_pair: false,
                question_text: None,
                start_position: start as u32,
                end_position: end as u32,
            });
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(config.chunk_overlap);
        if start == end {
            break;
        }
    }

    out
}

/// Searches backward from `tentative_end` for the nearest separator in
/// `SPLIT_HIERARCHY`, preferring the highest-priority one found within the
/// search window; falls back to a plain space, then to `tentative_end`.
fn find_break_point(chars: &[char], start: usize, tentative_end: usize) -> usize {
    let window: String = chars[start..tentative_end].iter().collect();

    for separator in SPLIT_HIERARCHY {
        if let Some(pos) = window.rfind(separator) {
            let byte_to_char = window[..pos + separator.len()].chars().count();
            let candidate = start + byte_to_char;
            if candidate > start {
                return candidate;
            }
        }
    }

    if let Some(pos) = window.rfind(' ') {
        let byte_to_char = window[..pos + 1].chars().count();
        let candidate = start + byte_to_char;
        if candidate > start {
            return candidate;
        }
    }

    tentative_end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    #[test]
    fn detects_faq_structure_by_pair_coverage() {
        let text = "¿Cual es el horario? De 9 a 18 horas. ¿Donde esta la oficina? En la calle principal. ¿Cuanto cuesta? Es gratuito.";
        let chunks = chunk_document(text, "doc.txt", &config());
        assert!(chunks.iter().all(|c| c.is_qa_pair));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn filename_qna_hint_forces_pair_chunking() {
        let text = "¿Pregunta uno? Respuesta uno.";
        let chunks = chunk_document(text, "faq_QNA_export.txt", &ChunkingConfig { qna_min_pairs: 1, ..config() });
        assert!(!chunks.is_empty());
        assert!(chunks[0].is_qa_pair);
    }

    #[test]
    fn qna_skips_answers_over_max_length() {
        let long_answer = "a ".repeat(2000);
        let text = format!("¿Pregunta? {long_answer}");
        let chunks = chunk_qna_pairs(&text, &ChunkingConfig { qna_max_answer_chars: 100, ..config() });
        assert!(chunks.is_empty());
    }

    #[test]
    fn recursive_fallback_splits_plain_prose_under_chunk_size() {
        let text = "oracion uno. ".repeat(300);
        let chunks = chunk_recursive(&text, &ChunkingConfig { chunk_size: 200, chunk_overlap: 20, ..config() });
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 220);
        }
    }

    #[test]
    fn recursive_fallback_emits_content_without_overlap_distinct_from_text() {
        let text = "parrafo uno aqui. ".repeat(50) + &"parrafo dos aqui. ".repeat(50);
        let chunks = chunk_recursive(&text, &ChunkingConfig { chunk_size: 300, chunk_overlap: 50, ..config() });
        assert!(chunks.len() > 1);
        assert!(chunks[1].content_without_overlap.len() <= chunks[1].text.len());
    }
}
