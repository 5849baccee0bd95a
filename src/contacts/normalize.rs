//! Text normalisation shared by ingest, enrichment matching and scoring.

use std::sync::LazyLock;

use regex::Regex;

/// Legal-entity and generic trading words dropped from company names
/// before keying.
const COMPANY_SUFFIXES: &[&str] = &[
    "pvt", "private", "ltd", "limited", "inc", "incorporated", "llc", "llp", "corp",
    "corporation", "co", "gmbh", "plc", "pte", "sa", "india", "group", "technologies",
    "technology", "tech", "solutions",
];

static HONORIFIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(dr|mr|mrs|ms|prof|shri|smt)\.?\s+").expect("static regex")
});

fn tokens(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn significant_tokens(company: &str) -> Vec<String> {
    let kept: Vec<String> = tokens(company)
        .filter(|t| !COMPANY_SUFFIXES.contains(&t.as_str()))
        .collect();
    if kept.is_empty() {
        // Name made only of suffix words; key on everything.
        tokens(company).collect()
    } else {
        kept
    }
}

/// Company key used for conflict grouping.
///
/// Lower-cases, drops suffix words and joins the remaining alphanumerics:
/// `"AcmeInc Pvt. Ltd."` becomes `"acmeinc"`.
pub fn company_key(company: &str) -> String {
    significant_tokens(company).concat()
}

/// First significant word of a company name.
///
/// Provider records often carry the full registered name, so
/// `"Razorpay Software Private Limited"` and `"Razorpay"` share the root
/// `"razorpay"` while their keys differ.
pub fn company_root(company: &str) -> String {
    significant_tokens(company)
        .into_iter()
        .next()
        .unwrap_or_default()
}

/// Two company names that refer to the same organisation.
pub fn same_company(a: &str, b: &str) -> bool {
    let (root_a, root_b) = (company_root(a), company_root(b));
    !root_a.is_empty() && root_a == root_b
}

/// Person name without honorifics, punctuation or extra whitespace.
pub fn person_name(name: &str) -> String {
    let stripped = HONORIFIC.replace(name.trim(), "");
    tokens(&stripped).collect::<Vec<_>>().join(" ")
}

/// Map a raw employee count to its size band.
pub fn headcount_band(count: u64) -> &'static str {
    match count {
        0..=10 => "1-10",
        11..=50 => "11-50",
        51..=200 => "51-200",
        201..=500 => "201-500",
        501..=1000 => "501-1000",
        1001..=5000 => "1001-5000",
        _ => "5000+",
    }
}

/// Normalise a company size band string.
///
/// Dashes of any kind become `-` and inner whitespace is removed. A bare
/// number is treated as a headcount.
pub fn size_band(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if matches!(c, '–' | '—' | '‒') { '-' } else { c })
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(count) = cleaned.parse::<u64>() {
        return Some(headcount_band(count).to_string());
    }
    Some(cleaned)
}

/// Normalise a funding stage: `"Series A"` becomes `"series_a"`.
pub fn funding_stage(raw: &str) -> Option<String> {
    let joined = tokens(raw).collect::<Vec<_>>().join("_");
    if joined.is_empty() { None } else { Some(joined) }
}

/// Whitespace-separated word count.
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Empty or whitespace-only strings become `None`.
pub fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
