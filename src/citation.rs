//! Citation Validator & Repair (§4.10): the post-generation state machine
//! that enforces one bullet per page, parses the `Fuente:` section, and
//! checks each quote against the exact text the assembler showed for that
//! page — `ContextBundle.context_by_key` is the only ground truth.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::{normalize, word_set, NormalizeLevel};
use crate::prompt::{ABSENT_PHRASE_EXPLICIT, ABSENT_PHRASE_STRUCTURED};
use crate::types::{ContextBundle, ParsedCitation};

const MIN_QUOTE_WORDS: usize = 4;
const MAX_QUOTE_WORDS: usize = 15;
const MIN_CHUNK_WORDS_FOR_VALID_KEY: usize = 6;
const BEST_SPAN_MIN_WORDS: usize = 6;
const BEST_SPAN_MAX_WORDS: usize = 12;

static FUENTE_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)fuente:\s*$").unwrap());

static CITATION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*-+\s*P[aá]gina\s+(\d+)\s*[—–-]\s*"([^"]+)""#).unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Absent,
    Partial,
    Full,
}

#[derive(Debug, Clone)]
pub struct CitationOutcome {
    pub answer: String,
    pub shape: ResponseShape,
    pub valid_citations: usize,
    pub total_citations: usize,
    pub warnings: Vec<String>,
}

/// Find the last `Fuente:` block and drop all but the first bullet per page.
pub fn dedupe_fuente_bullets(answer: &str) -> String {
    let Some(header_match) = FUENTE_HEADER_RE.find_iter(answer).last() else {
        return answer.to_string();
    };

    let (head, tail) = answer.split_at(header_match.end());
    let mut seen_pages: HashSet<String> = HashSet::new();
    let mut kept_lines = Vec::new();

    for line in tail.lines() {
        if let Some(caps) = CITATION_LINE_RE.captures(line) {
            let page = caps.get(1).unwrap().as_str().to_string();
            if seen_pages.insert(page) {
                kept_lines.push(line.to_string());
            }
        } else {
            kept_lines.push(line.to_string());
        }
    }

    format!("{head}{}", kept_lines.join("\n"))
}

pub fn classify_response(answer: &str) -> ResponseShape {
    let normalized = normalize(answer, NormalizeLevel::Strict);
    let has_explicit_absent = normalized.contains(&normalize(ABSENT_PHRASE_EXPLICIT, NormalizeLevel::Strict));
    let has_structured_absent =
        normalized.contains(&normalize(ABSENT_PHRASE_STRUCTURED, NormalizeLevel::Strict));

    if has_explicit_absent || has_structured_absent {
        ResponseShape::Absent
    } else if CITATION_LINE_RE.is_match(answer) {
        ResponseShape::Full
    } else {
        ResponseShape::Partial
    }
}

pub fn parse_citations(answer: &str) -> Vec<ParsedCitation> {
    CITATION_LINE_RE
        .captures_iter(answer)
        .map(|caps| ParsedCitation {
            source_key: format!("Página {}", &caps[1]),
            quote: caps[2].to_string(),
        })
        .collect()
}

/// Validate one citation against the chunk text recorded for its page key.
/// Returns `Some(repaired_quote)` when validation (possibly after
/// autofixing the quote) succeeds, `None` when the citation is invalid.
pub fn validate_citation(citation: &ParsedCitation, context: &ContextBundle) -> Option<String> {
    let Some(chunk_text) = context.context_by_key.get(&citation.source_key) else {
        return None;
    };
    if chunk_text.split_whitespace().count() < MIN_CHUNK_WORDS_FOR_VALID_KEY {
        return None;
    }

    if pass_ellipsis_substring(&citation.quote, chunk_text, NormalizeLevel::Strict) {
        return Some(citation.quote.clone());
    }
    if pass_ellipsis_substring(&citation.quote, chunk_text, NormalizeLevel::LooseDecimalSafe) {
        return Some(citation.quote.clone());
    }
    if let Some(fixed) = auto_fix_quote_length(&citation.quote, chunk_text) {
        return Some(fixed);
    }
    if let Some(span) = extract_best_span(&citation.quote, chunk_text) {
        return Some(span);
    }
    Some(first_n_words(chunk_text, MAX_QUOTE_WORDS))
}

/// PASS 1/2: split the quote on ellipsis markers and require each part to
/// appear, in order, inside the chunk under the given normalization level.
fn pass_ellipsis_substring(quote: &str, chunk: &str, level: NormalizeLevel) -> bool {
    let normalized_chunk = normalize(chunk, level);
    let parts: Vec<&str> = quote.split("...").flat_map(|p| p.split('…')).collect();

    let mut search_from = 0;
    for part in parts {
        let normalized_part = normalize(part, level);
        if normalized_part.is_empty() {
            continue;
        }
        match normalized_chunk[search_from..].find(&normalized_part) {
            Some(pos) => search_from += pos + normalized_part.len(),
            None => return false,
        }
    }
    true
}

/// PASS 3: if the quote's word count falls outside [4,15], slide a window
/// around the quote's approximate position in the chunk to hit the range.
fn auto_fix_quote_length(quote: &str, chunk: &str) -> Option<String> {
    let word_count = quote.split_whitespace().count();
    if (MIN_QUOTE_WORDS..=MAX_QUOTE_WORDS).contains(&word_count) {
        return None;
    }

    let chunk_words: Vec<&str> = chunk.split_whitespace().collect();
    let first_quote_word = normalize(quote.split_whitespace().next()?, NormalizeLevel::Strict);
    let anchor = chunk_words
        .iter()
        .position(|w| normalize(w, NormalizeLevel::Strict) == first_quote_word)
        .unwrap_or(0);

    let target_len = MAX_QUOTE_WORDS.min(chunk_words.len());
    let end = (anchor + target_len).min(chunk_words.len());
    let start = end.saturating_sub(target_len.min(MAX_QUOTE_WORDS)).max(0);
    let start = start.min(anchor);
    Some(chunk_words[start..end].join(" "))
}

/// PASS 4: scan contiguous 6-12 word windows, pick the one maximizing
/// normalized word-set overlap with the quote.
fn extract_best_span(quote: &str, chunk: &str) -> Option<String> {
    let chunk_words: Vec<&str> = chunk.split_whitespace().collect();
    if chunk_words.len() < BEST_SPAN_MIN_WORDS {
        return None;
    }
    let hint_set = word_set(quote, 3);
    if hint_set.is_empty() {
        return None;
    }

    let mut best: Option<(usize, String)> = None;
    for window_len in BEST_SPAN_MIN_WORDS..=BEST_SPAN_MAX_WORDS.min(chunk_words.len()) {
        for start in 0..=chunk_words.len() - window_len {
            let span = chunk_words[start..start + window_len].join(" ");
            let span_set = word_set(&span, 3);
            let overlap = hint_set.intersection(&span_set).count();
            if overlap == 0 {
                continue;
            }
            if best.as_ref().map(|(best_overlap, _)| overlap > *best_overlap).unwrap_or(true) {
                best = Some((overlap, span));
            }
        }
    }
    best.map(|(_, span)| span)
}

fn first_n_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

/// Run the full validate pass over a parsed answer, computing the outcome
/// without yet deciding whether to trigger a repair round-trip.
pub fn validate_answer(answer: &str, context: &ContextBundle) -> CitationOutcome {
    let deduped = dedupe_fuente_bullets(answer);
    let shape = classify_response(&deduped);
    let citations = parse_citations(&deduped);

    let mut valid = 0;
    let mut warnings = Vec::new();
    for citation in &citations {
        match validate_citation(citation, context) {
            Some(_) => valid += 1,
            None => warnings.push(format!(
                "citation for {} could not be validated against assembled context",
                citation.source_key
            )),
        }
    }

    CitationOutcome {
        answer: deduped,
        shape,
        valid_citations: valid,
        total_citations: citations.len(),
        warnings,
    }
}

/// True when a repair round-trip should be attempted: zero valid citations
/// in a non-absent answer, or citations missing entirely.
pub fn needs_repair(outcome: &CitationOutcome) -> bool {
    outcome.shape != ResponseShape::Absent && outcome.valid_citations == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn context_with(page: u32, text: &str) -> ContextBundle {
        let mut context_by_key = HashMap::new();
        context_by_key.insert(format!("Página {page}"), text.to_string());
        ContextBundle {
            context: text.to_string(),
            used_chunks: 1,
            sources: vec!["doc.pdf".to_string()],
            context_by_key,
        }
    }

    #[test]
    fn dedupe_keeps_first_bullet_per_page() {
        let answer = "Respuesta.\n\nFuente:\n- Página 1 — \"texto a\"\n- Página 1 — \"texto b\"\n- Página 2 — \"texto c\"";
        let deduped = dedupe_fuente_bullets(answer);
        assert_eq!(deduped.matches("Página 1").count(), 1);
        assert!(deduped.contains("Página 2"));
    }

    #[test]
    fn classify_detects_absent_phrase() {
        let answer = format!("{ABSENT_PHRASE_EXPLICIT}.");
        assert_eq!(classify_response(&answer), ResponseShape::Absent);
    }

    #[test]
    fn parse_citations_extracts_page_and_quote() {
        let answer = "Texto.\n\nFuente:\n- Página 3 — \"los documentos necesarios son estos\"";
        let citations = parse_citations(answer);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source_key, "Página 3");
        assert_eq!(citations[0].quote, "los documentos necesarios son estos");
    }

    #[test]
    fn validate_citation_passes_strict_substring() {
        let context = context_with(1, "los documentos necesarios son el acta y el comprobante");
        let citation = ParsedCitation {
            source_key: "Página 1".to_string(),
            quote: "los documentos necesarios son el acta".to_string(),
        };
        assert!(validate_citation(&citation, &context).is_some());
    }

    #[test]
    fn validate_citation_rejects_unknown_page_key() {
        let context = context_with(1, "texto de la pagina uno con suficientes palabras");
        let citation = ParsedCitation {
            source_key: "Página 99".to_string(),
            quote: "texto inventado".to_string(),
        };
        assert!(validate_citation(&citation, &context).is_none());
    }

    #[test]
    fn extract_best_span_finds_overlapping_window() {
        let chunk = "el tramite requiere presentar el acta de nacimiento y el comprobante de domicilio vigente";
        let span = extract_best_span("acta de nacimiento comprobante", chunk).unwrap();
        assert!(span.contains("acta"));
    }

    #[test]
    fn needs_repair_true_only_for_non_absent_zero_valid() {
        let outcome = CitationOutcome {
            answer: String::new(),
            shape: ResponseShape::Partial,
            valid_citations: 0,
            total_citations: 1,
            warnings: vec![],
        };
        assert!(needs_repair(&outcome));

        let absent_outcome = CitationOutcome {
            shape: ResponseShape::Absent,
            ..outcome
        };
        assert!(!needs_repair(&absent_outcome));
    }
}
