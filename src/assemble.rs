//! Context Assembler (§4.8): turns a selected, ordered hit list into the
//! final context string under four caps, and records the exact text shown
//! for each page so citation validation has something authoritative to
//! check against.

use crate::config::AssemblerConfig;
use crate::types::{ContextBundle, RetrievalHit};

pub fn assemble(hits: &[RetrievalHit], config: &AssemblerConfig) -> ContextBundle {
    let unique_sources = hits
        .iter()
        .map(|h| h.source_name())
        .collect::<std::collections::HashSet<_>>()
        .len();
    let diversity_mode = unique_sources > 1;

    let mut pieces: Vec<String> = Vec::new();
    let mut context_by_key: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut sources: Vec<String> = Vec::new();
    let mut used_chunks = 0usize;
    let mut per_source_count: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut total_chars = 0usize;

    for (i, hit) in hits.iter().enumerate() {
        if used_chunks >= config.max_chunks_total {
            break;
        }
        if total_chars >= config.max_context_chars {
            break;
        }

        let source_count = per_source_count.get(hit.source_name()).copied().unwrap_or(0);
        let remaining = hits.len() - i;
        let needed = config.max_chunks_total.saturating_sub(used_chunks);
        if diversity_mode && source_count >= config.max_chunks_per_source && remaining > needed * 2 {
            continue;
        }

        let prefer_overlap_free = i > 0
            && hits[i - 1].source_name() == hit.source_name()
            && hit.chunk_index() == hits[i - 1].chunk_index() + 1;
        let body = if prefer_overlap_free && !hit.properties.content_without_overlap.is_empty() {
            &hit.properties.content_without_overlap
        } else {
            &hit.properties.text
        };

        let truncated: String = body.chars().take(config.max_chars_per_chunk).collect();

        let page = hit.properties.page_label();
        let formatted = format!("{} Página {}\n{}", hit.source_name(), page, truncated);
        pieces.push(formatted);

        let key = format!("Página {page}");
        context_by_key
            .entry(key)
            .and_modify(|existing| {
                existing.push('\n');
                existing.push_str(&truncated);
            })
            .or_insert_with(|| truncated.clone());

        if !sources.contains(&hit.source_name().to_string()) {
            sources.push(hit.source_name().to_string());
        }
        *per_source_count.entry(hit.source_name().to_string()).or_insert(0) += 1;
        used_chunks += 1;
        total_chars += truncated.len();
    }

    ContextBundle {
        context: pieces.join("\n\n---\n\n"),
        used_chunks,
        sources,
        context_by_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;

    fn hit(source: &str, chunk_index: u32, page: u32, text: &str) -> RetrievalHit {
        let chunk = Chunk {
            text: text.to_string(),
            source_name: source.to_string(),
            chunk_index,
            total_chunks: 10,
            prev_chunk_index: chunk_index.checked_sub(1),
            next_chunk_index: Some(chunk_index + 1),
            page_number: Some(page),
            source_namespace: String::new(),
            upload_date: String::new(),
            language: "es".to_string(),
            content_without_overlap: format!("[no-overlap]{text}"),
            is_qa_pair: false,
            question_text: None,
            start_position: 0,
            end_position: text.len() as u32,
        };
        RetrievalHit::new(format!("{source}-{chunk_index}"), chunk, 1.0)
    }

    #[test]
    fn truncation_never_adds_ellipsis() {
        let config = AssemblerConfig {
            max_chars_per_chunk: 5,
            ..AssemblerConfig::default()
        };
        let bundle = assemble(&[hit("doc.pdf", 0, 1, "hello world this is long")], &config);
        assert!(!bundle.context.contains("..."));
        assert!(bundle.context.contains("hello"));
    }

    #[test]
    fn same_page_concatenates_under_one_key() {
        let config = AssemblerConfig::default();
        let hits = vec![hit("doc.pdf", 0, 1, "primera parte"), hit("doc.pdf", 1, 1, "segunda parte")];
        let bundle = assemble(&hits, &config);
        let text = &bundle.context_by_key["Página 1"];
        assert!(text.contains("primera parte"));
        assert!(text.contains("segunda parte"));
    }

    #[test]
    fn adjacent_same_source_chunk_prefers_content_without_overlap() {
        let config = AssemblerConfig::default();
        let hits = vec![hit("doc.pdf", 0, 1, "uno"), hit("doc.pdf", 1, 2, "dos")];
        let bundle = assemble(&hits, &config);
        assert!(bundle.context.contains("[no-overlap]dos"));
    }

    #[test]
    fn respects_max_chunks_per_source_when_diverse() {
        let config = AssemblerConfig {
            max_chunks_per_source: 1,
            max_chunks_total: 10,
            ..AssemblerConfig::default()
        };
        let hits = vec![
            hit("a.pdf", 0, 1, "a1"),
            hit("a.pdf", 5, 2, "a2"),
            hit("a.pdf", 9, 3, "a3"),
            hit("b.pdf", 0, 1, "b1"),
        ];
        let bundle = assemble(&hits, &config);
        assert_eq!(bundle.sources.len(), 2);
    }
}
