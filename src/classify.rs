//! Question classification (§4.2): a scored-rules engine mapping a raw
//! query to one of four intent tags plus the hybrid-search tuning that tag
//! implies.
//!
//! All patterns are compiled once, at first use, via `LazyLock` — never per
//! request (§9 REDESIGN FLAGS: "regex-heavy classifier... forbid
//! per-request compilation").

use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::{normalize, NormalizeLevel};
use crate::types::{ClassifiedQuery, FusionStrategy, QuestionType};

enum Pattern {
    Regex(&'static Regex),
    Literal(&'static str),
}

struct Rule {
    question_type: QuestionType,
    priority: u8,
    patterns: &'static [(Pattern, i32)],
}

static NUMERIC_PATTERNS_RE: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\bcuant[oa]s?\b").unwrap(),
        Regex::new(r"\bcuanto cuesta\b|\bprecio\b|\bcosto\b|\bmonto\b").unwrap(),
        Regex::new(r"\d+").unwrap(),
    ]
});

static LIST_PATTERNS_RE: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\bcuales son\b|\blista de\b|\benumera\b|\bmenciona\b").unwrap(),
        Regex::new(r"\brequisitos\b|\bdocumentos necesarios\b|\bpasos\b").unwrap(),
        Regex::new(r"\btodos los\b|\btodas las\b").unwrap(),
    ]
});

static ORDERED_PATTERNS_RE: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\bprimero\b|\bsegundo\b|\btercero\b|\border de\b|\bsecuencia\b").unwrap(),
        Regex::new(r"\bproceso\b|\bprocedimiento\b|\bpasos a seguir\b").unwrap(),
        Regex::new(r"\bantes de\b|\bdespues de\b|\bluego\b").unwrap(),
    ]
});

static GENERAL_PATTERNS_RE: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"\bque es\b|\bcomo funciona\b|\bpor que\b|\bexplica\b").unwrap(),
        Regex::new(r"\bpolitica\b|\breglamento\b|\bnorma\b").unwrap(),
    ]
});

static TOTAL_QUERY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btotal\b|\bsubtotal\b|\bsuma\b|\bcuantos\b").unwrap());

static SHORT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]{2,}-?\d+").unwrap());

fn score_group(query: &str, patterns: &[Regex], weight: i32) -> i32 {
    patterns.iter().filter(|re| re.is_match(query)).count() as i32 * weight
}

struct Scored {
    question_type: QuestionType,
    priority: u8,
    score: i32,
}

/// Classify a raw query, normalizing it (strict) first, and return the
/// tuning table values for the winning type (§4.2).
pub fn classify(raw_query: &str, default_target_chunks: usize, total_target_chunks: usize) -> ClassifiedQuery {
    let normalized = normalize(raw_query, NormalizeLevel::Strict);

    let mut candidates = vec![
        Scored {
            question_type: QuestionType::Numeric,
            priority: 3,
            score: score_group(&normalized, NUMERIC_PATTERNS_RE.as_slice(), 2),
        },
        Scored {
            question_type: QuestionType::List,
            priority: 3,
            score: score_group(&normalized, LIST_PATTERNS_RE.as_slice(), 2),
        },
        Scored {
            question_type: QuestionType::OrderedSequence,
            priority: 2,
            score: score_group(&normalized, ORDERED_PATTERNS_RE.as_slice(), 2),
        },
        Scored {
            question_type: QuestionType::ReglaGeneral,
            priority: 1,
            score: score_group(&normalized, GENERAL_PATTERNS_RE.as_slice(), 1),
        },
    ];

    // Highest score wins; ties broken by higher priority.
    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(b.priority.cmp(&a.priority)));
    let winner = &candidates[0];

    let question_type = if winner.score <= 0 {
        QuestionType::ReglaGeneral
    } else {
        winner.question_type
    };

    let (mut alpha, fusion) = tuning(question_type);

    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    if tokens.len() <= 3 {
        alpha = alpha.min(0.35);
    }
    let has_digit_quote_or_code = raw_query.chars().any(|c| c.is_ascii_digit())
        || raw_query.contains('"')
        || SHORT_CODE_RE.is_match(raw_query);
    if has_digit_quote_or_code {
        alpha = alpha.min(0.35);
    }

    let target_chunks = if TOTAL_QUERY_RE.is_match(&normalized) {
        total_target_chunks
    } else {
        default_target_chunks
    };

    ClassifiedQuery {
        raw_query: raw_query.to_string(),
        embed_query: raw_query.to_string(),
        bm25_query: raw_query.to_string(),
        query_type: question_type,
        alpha,
        fusion,
        target_chunks,
    }
}

fn tuning(question_type: QuestionType) -> (f32, FusionStrategy) {
    match question_type {
        QuestionType::Numeric => (0.35, FusionStrategy::RankedFusion),
        QuestionType::List => (0.50, FusionStrategy::RelativeScoreFusion),
        QuestionType::OrderedSequence => (0.40, FusionStrategy::RelativeScoreFusion),
        QuestionType::ReglaGeneral => (0.75, FusionStrategy::RelativeScoreFusion),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_query_gets_low_alpha() {
        let classified = classify("¿Cuántos empleados tiene la empresa?", 12, 20);
        assert_eq!(classified.alpha, 0.35);
    }

    #[test]
    fn short_query_caps_alpha() {
        let classified = classify("explica la politica", 12, 20);
        assert!(classified.alpha <= 0.35);
    }

    #[test]
    fn code_like_query_caps_alpha() {
        let classified = classify("que es EC1234", 12, 20);
        assert!(classified.alpha <= 0.35);
    }

    #[test]
    fn zero_score_falls_back_to_general() {
        let classified = classify("zzz qqq www", 12, 20);
        assert_eq!(classified.query_type, QuestionType::ReglaGeneral);
    }

    #[test]
    fn total_query_requests_more_chunks() {
        let classified = classify("¿Cuál es el total de documentos requeridos?", 12, 20);
        assert_eq!(classified.target_chunks, 20);
    }

    #[test]
    fn list_query_classified_as_list() {
        let classified = classify("¿Cuáles son los requisitos y documentos necesarios?", 12, 20);
        assert_eq!(classified.query_type, QuestionType::List);
    }
}
