//! Text canonicalization for matching across accent/punctuation/ellipsis
//! drift (§4.1). Everything downstream of raw input — classification,
//! citation matching — goes through one of these levels rather than ad hoc
//! `.to_lowercase()` calls.

use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeLevel {
    /// Collapse whitespace, keep letters/digits/basic punctuation.
    Strict,
    /// Strict, minus punctuation, except the decimal point inside a number.
    LooseDecimalSafe,
    /// Strict, then strip trailing punctuation. Used on generated answers.
    Detect,
}

static TRAILING_PUNCT_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[\s.,;:!?¿¡\-]+$").expect("trailing punct regex is valid"));

static MOJIBAKE_TABLE: &[(&str, &str)] = &[
    ("├®", "é"), ("├®", "é"), ("├¡", "í"), ("├│", "ó"), ("├║", "ú"), ("├▒", "ñ"),
    ("├ü", "Á"), ("├ë", "É"), ("├ì", "Í"), ("├ô", "Ó"), ("├Ü", "Ú"), ("├æ", "Ñ"),
    ("Ã©", "é"), ("Ã­", "í"), ("Ã³", "ó"), ("Ãº", "ú"), ("Ã±", "ñ"),
    ("Ã¡", "á"), ("Ã", "Á"),
];

/// NFC-normalize, strip diacritics, lowercase, then apply the given
/// strictness level's extra rules.
pub fn normalize(text: &str, level: NormalizeLevel) -> String {
    let nfc: String = text.nfc().collect();
    let lowered = nfc.to_lowercase();
    let stripped = strip_diacritics(&lowered);

    match level {
        NormalizeLevel::Strict => collapse_whitespace(&keep_basic(&stripped)),
        NormalizeLevel::LooseDecimalSafe => {
            collapse_whitespace(&strip_punct_keep_decimals(&stripped))
        }
        NormalizeLevel::Detect => {
            let strict = collapse_whitespace(&keep_basic(&stripped));
            TRAILING_PUNCT_RE.replace(&strict, "").trim().to_string()
        }
    }
}

fn strip_diacritics(text: &str) -> String {
    // Decompose (NFD) then drop combining marks, recompose isn't needed
    // since we only keep base letters afterward.
    use unicode_normalization::char::is_combining_mark;
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

fn keep_basic(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ".,;:!?-'\"".contains(*c))
        .collect()
}

fn strip_punct_keep_decimals(text: &str) -> String {
    // Placeholder-protect decimal points (a '.' with a digit on both sides),
    // strip all other punctuation, then restore the decimal points. No
    // lookaround here (the `regex` crate doesn't support it) — a plain
    // char-window scan plays the same role.
    const PLACEHOLDER: &str = "\u{0}DECIMAL\u{0}";
    let protected = protect_decimal_points(text, PLACEHOLDER);
    let stripped: String = protected
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '\u{0}')
        .collect();
    stripped.replace(PLACEHOLDER, ".")
}

fn protect_decimal_points(text: &str, placeholder: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if *c == '.' {
            let prev_is_digit = i > 0 && chars[i - 1].is_ascii_digit();
            let next_is_digit = i + 1 < chars.len() && chars[i + 1].is_ascii_digit();
            if prev_is_digit && next_is_digit {
                out.push_str(placeholder);
                continue;
            }
        }
        out.push(*c);
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Best-effort mojibake repair, gated behind the compatibility flag (§9).
/// Only meant to run when decoding the raw request body as clean UTF-8
/// already failed.
pub fn repair_mojibake(text: &str, enabled: bool) -> String {
    if !enabled {
        return text.to_string();
    }
    let mut repaired = text.to_string();
    for (bad, good) in MOJIBAKE_TABLE {
        repaired = repaired.replace(bad, good);
    }
    repaired
}

/// Split normalized text into words of at least `min_len` characters — the
/// word-set basis for Jaccard similarity (MMR) and evidence-overlap scoring
/// (best-span extraction).
pub fn word_set(text: &str, min_len: usize) -> std::collections::HashSet<String> {
    normalize(text, NormalizeLevel::Strict)
        .split_whitespace()
        .filter(|w| w.len() >= min_len)
        .map(|w| w.to_string())
        .collect()
}

pub fn jaccard_similarity(a: &str, b: &str, min_word_len: usize) -> f32 {
    let set_a = word_set(a, min_word_len);
    let set_b = word_set(b, min_word_len);
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_lowercases() {
        let out = normalize("¿CUÁNTOS ESTADOS?", NormalizeLevel::Strict);
        assert_eq!(out, "cuantos estados?");
    }

    #[test]
    fn loose_decimal_safe_preserves_decimal_point() {
        let out = normalize("El valor es 3.14 exacto.", NormalizeLevel::LooseDecimalSafe);
        assert!(out.contains("3.14"));
        assert!(!out.contains("314 "));
    }

    #[test]
    fn loose_decimal_safe_strips_other_punctuation() {
        let out = normalize("Hola, mundo!", NormalizeLevel::LooseDecimalSafe);
        assert_eq!(out, "hola mundo");
    }

    #[test]
    fn detect_strips_trailing_punctuation() {
        let out = normalize("Esto es una respuesta.", NormalizeLevel::Detect);
        assert_eq!(out, "esto es una respuesta");
    }

    #[test]
    fn renormalizing_is_idempotent() {
        let once = normalize("¿Cuántos Estados opera la EMPRESA?", NormalizeLevel::Strict);
        let twice = normalize(&once, NormalizeLevel::Strict);
        assert_eq!(once, twice);
    }

    #[test]
    fn mojibake_repair_only_when_enabled() {
        let broken = "caf├® con leche";
        assert_eq!(repair_mojibake(broken, false), broken);
        assert_eq!(repair_mojibake(broken, true), "café con leche");
    }

    #[test]
    fn jaccard_similarity_identical_text_is_one() {
        let sim = jaccard_similarity("los documentos necesarios", "los documentos necesarios", 3);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn jaccard_similarity_disjoint_text_is_zero() {
        let sim = jaccard_similarity("gatos perros pajaros", "sol luna estrellas", 3);
        assert_eq!(sim, 0.0);
    }
}
