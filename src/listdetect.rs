//! List structure and declared-total-vs-visible-items mismatch detection
//! (§4.3). Operates on raw chunk text — no normalization, since list markers
//! (`-`, digits, roman numerals) are punctuation-sensitive.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

const MIN_SIGNAL_MATCHES: usize = 2;
const COUNT_WINDOW_CHARS: usize = 220;
const MIN_DECLARED_TOTAL: i64 = 3;
const MAX_DECLARED_TOTAL: i64 = 100;

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[-•*◦▪►]\s+\S").unwrap());

static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^\s*(?:\d+|[a-z]|[ivxlcdm]+)[.):-]\s").unwrap());

static DOMAIN_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"EC\d{3,4}(?:\.\d{1,3})?").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct ListDetection {
    pub is_list: bool,
    pub item_count: usize,
    pub patterns: Vec<&'static str>,
    pub list_start: Option<usize>,
}

pub fn detect_list(text: &str) -> ListDetection {
    let bullet_matches: Vec<_> = BULLET_RE.find_iter(text).collect();
    let numbered_matches: Vec<_> = NUMBERED_RE.find_iter(text).collect();
    let domain_matches: HashSet<&str> = DOMAIN_CODE_RE
        .find_iter(text)
        .map(|m| m.as_str())
        .collect();

    let mut patterns = Vec::new();
    let mut earliest_start: Option<usize> = None;
    let mut item_count = 0usize;

    if bullet_matches.len() >= MIN_SIGNAL_MATCHES {
        patterns.push("bullets");
        item_count = item_count.max(bullet_matches.len());
        earliest_start = Some(min_opt(earliest_start, bullet_matches[0].start()));
    }
    if numbered_matches.len() >= MIN_SIGNAL_MATCHES {
        patterns.push("numbered");
        item_count = item_count.max(numbered_matches.len());
        earliest_start = Some(min_opt(earliest_start, numbered_matches[0].start()));
    }
    if domain_matches.len() >= MIN_SIGNAL_MATCHES {
        patterns.push("domain_codes");
        item_count = item_count.max(domain_matches.len());
        if let Some(m) = DOMAIN_CODE_RE.find(text) {
            earliest_start = Some(min_opt(earliest_start, m.start()));
        }
    }

    ListDetection {
        is_list: !patterns.is_empty(),
        item_count,
        patterns,
        list_start: earliest_start,
    }
}

fn min_opt(current: Option<usize>, candidate: usize) -> usize {
    match current {
        Some(c) => c.min(candidate),
        None => candidate,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountMismatch {
    pub declared_total: i64,
    pub visible_items: usize,
    pub mismatch: bool,
}

/// Scan the window immediately before `list_start` for a plausible declared
/// total, and decide whether it disagrees with what's actually visible.
pub fn detect_count_mismatch(text: &str, detection: &ListDetection) -> Option<CountMismatch> {
    let list_start = detection.list_start?;
    let window_start = list_start.saturating_sub(COUNT_WINDOW_CHARS);
    let window = char_safe_slice(text, window_start, list_start);

    let declared_total = find_declared_totals(&window)
        .into_iter()
        .filter(|n| (MIN_DECLARED_TOTAL..=MAX_DECLARED_TOTAL).contains(n))
        .last()?;

    let visible_items = detection.item_count;
    let mismatch = declared_total >= visible_items as i64 + 3
        && declared_total <= (visible_items as i64 * 3).max(25);

    Some(CountMismatch {
        declared_total,
        visible_items,
        mismatch,
    })
}

/// Stand-alone 1-3 digit numbers in `text`: not part of a percentage
/// (`95%`), a money amount (`$95`), a decimal (`95.5`), or a longer digit
/// run. A manual scan in place of the lookaround `regex` doesn't support.
fn find_declared_totals(text: &str) -> Vec<i64> {
    let chars: Vec<char> = text.chars().collect();
    let mut totals = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let end = i;
        let run_len = end - start;

        let preceded_by_marker = start > 0 && matches!(chars[start - 1], '%' | '$' | '.');
        let followed_by_decimal =
            end < chars.len() && chars[end] == '.' && chars.get(end + 1).is_some_and(|c| c.is_ascii_digit());
        let mut j = end;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        let followed_by_percent = j < chars.len() && chars[j] == '%';

        if run_len >= 1 && run_len <= 3 && !preceded_by_marker && !followed_by_decimal && !followed_by_percent {
            if let Ok(n) = chars[start..end].iter().collect::<String>().parse::<i64>() {
                totals.push(n);
            }
        }
    }
    totals
}

fn char_safe_slice(text: &str, start: usize, end: usize) -> String {
    text.chars()
        .enumerate()
        .filter(|(i, _)| *i >= start.min(text.chars().count()) && *i < end.min(text.chars().count()))
        .map(|(_, c)| c)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_numbered_list() {
        let text = "Lista:\n1. Jalisco\n2. Nuevo Leon\n3. Sonora\n";
        let detection = detect_list(text);
        assert!(detection.is_list);
        assert!(detection.patterns.contains(&"numbered"));
    }

    #[test]
    fn single_bullet_is_not_a_list() {
        let text = "- Solo un elemento aqui.";
        let detection = detect_list(text);
        assert!(!detection.is_list);
    }

    #[test]
    fn declared_13_vs_visible_6_is_mismatch() {
        let text = "La empresa opera en 13 estados:\n1. A\n2. B\n3. C\n4. D\n5. E\n6. F\n";
        let detection = detect_list(text);
        let mismatch = detect_count_mismatch(text, &detection).unwrap();
        assert_eq!(mismatch.declared_total, 13);
        assert!(mismatch.mismatch);
    }

    #[test]
    fn declared_55_vs_visible_6_rejected_by_plausibility_gate() {
        let text = "Un total de 55 articulos:\n1. A\n2. B\n3. C\n4. D\n5. E\n6. F\n";
        let detection = detect_list(text);
        let mismatch = detect_count_mismatch(text, &detection).unwrap();
        assert_eq!(mismatch.declared_total, 55);
        assert!(!mismatch.mismatch);
    }

    #[test]
    fn declared_3_vs_visible_0_is_not_mismatch() {
        let detection = ListDetection {
            is_list: true,
            item_count: 0,
            patterns: vec!["numbered"],
            list_start: Some(20),
        };
        let text = "Hay un total de 3 cosas aqui despues de este texto largo.";
        let mismatch = detect_count_mismatch(text, &detection).unwrap();
        assert_eq!(mismatch.declared_total, 3);
        assert!(!mismatch.mismatch);
    }

    #[test]
    fn percent_numbers_are_excluded() {
        let text = "El 95% de los casos ocurren asi:\n1. A\n2. B\n";
        let detection = detect_list(text);
        let mismatch = detect_count_mismatch(text, &detection);
        assert!(mismatch.is_none() || mismatch.unwrap().declared_total != 95);
    }
}
