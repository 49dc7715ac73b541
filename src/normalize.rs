//! Text normalization: raw email thread → clean, feature-ready text.
//!
//! Two deterministic modes:
//! - `Basic`: entity decode, lowercase, strip URLs / addresses / digits / punctuation,
//!   drop mail boilerplate words, collapse whitespace.
//! - `Rich`: `Basic`, then stop-word removal and rule-based lemmatization.
//!
//! Both are pure and idempotent: `normalize(normalize(x)) == normalize(x)`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

static STOPWORDS: Lazy<HashSet<String>> = Lazy::new(|| {
    let raw = include_str!("../stopwords_en.json");
    serde_json::from_str::<Vec<String>>(raw)
        .expect("valid stop-word list")
        .into_iter()
        .collect()
});

static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:https?://|www\.)\S+").expect("url regex"));
static RE_EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+@\S+").expect("email regex"));
static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit regex"));

/// Header labels and sign-off words that carry no behavior signal.
pub const BOILERPLATE: &[&str] = &[
    "from", "to", "cc", "bcc", "subject", "re", "fw", "fwd", "regards", "sincerely", "dear",
    "best", "thanks", "thank", "hi", "hello",
];

// Irregular forms. Every target must be left untouched by `lemma_step`.
static IRREGULAR: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("paid", "pay"),
        ("sent", "send"),
        ("went", "go"),
        ("gone", "go"),
        ("bought", "buy"),
        ("brought", "bring"),
        ("thought", "think"),
        ("took", "take"),
        ("taken", "take"),
        ("gave", "give"),
        ("given", "give"),
        ("children", "child"),
        ("men", "man"),
        ("women", "woman"),
        ("people", "person"),
        ("told", "tell"),
        ("said", "say"),
        ("spoke", "speak"),
        ("spoken", "speak"),
        ("wrote", "write"),
        ("written", "write"),
        ("knew", "know"),
        ("known", "know"),
        ("left", "leave"),
        ("lost", "lose"),
        ("held", "hold"),
        ("met", "meet"),
        ("found", "find"),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizerMode {
    #[default]
    Basic,
    Rich,
}

/// Basic-mode normalization.
pub fn normalize(raw: &str) -> String {
    normalize_with(NormalizerMode::Basic, raw)
}

/// Absent text normalizes to "".
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize).unwrap_or_default()
}

pub fn normalize_with(mode: NormalizerMode, raw: &str) -> String {
    let basic = basic_tokens(raw);
    match mode {
        NormalizerMode::Basic => basic.join(" "),
        NormalizerMode::Rich => basic
            .into_iter()
            .filter(|t| keep_rich(t))
            .map(|t| lemmatize(&t))
            .filter(|l| keep_rich(l))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn basic_tokens(raw: &str) -> Vec<String> {
    let decoded = html_escape::decode_html_entities(raw).to_lowercase();
    let out = RE_URL.replace_all(&decoded, " ");
    let out = RE_EMAIL.replace_all(&out, " ");
    let out = RE_DIGITS.replace_all(&out, " ");

    let cleaned: String = out
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| !is_boilerplate(t))
        .map(str::to_string)
        .collect()
}

pub fn is_boilerplate(token: &str) -> bool {
    BOILERPLATE.contains(&token)
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

fn keep_rich(token: &str) -> bool {
    token.chars().count() >= 2 && !is_stopword(token) && !is_boilerplate(token)
}

/// Rule-based lemma, applied until nothing changes.
pub fn lemmatize(word: &str) -> String {
    let mut current = word.to_string();
    // Each step either shortens the word or lands on a fixed point.
    for _ in 0..word.len() + 1 {
        let next = lemma_step(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn lemma_step(w: &str) -> String {
    if let Some(base) = IRREGULAR.get(w) {
        return (*base).to_string();
    }
    if !w.is_ascii() || w.len() <= 3 {
        return w.to_string();
    }
    let n = w.len();

    if w.ends_with("sses") {
        return w[..n - 2].to_string();
    }
    if n > 4 && (w.ends_with("ies") || w.ends_with("ied")) {
        return format!("{}y", &w[..n - 3]);
    }
    if w.ends_with('s') && !(w.ends_with("ss") || w.ends_with("us") || w.ends_with("is")) {
        return w[..n - 1].to_string();
    }
    if n > 4 && w.ends_with("ed") && !w.ends_with("eed") {
        return restore_stem(&w[..n - 2]);
    }
    if n > 5 && w.ends_with("ing") {
        return restore_stem(&w[..n - 3]);
    }
    w.to_string()
}

/// Undo consonant doubling ("stopp" → "stop") or restore a dropped "e" ("escalat" → "escalate").
fn restore_stem(stem: &str) -> String {
    let b = stem.as_bytes();
    let n = b.len();
    if n > 3 && b[n - 1] == b[n - 2] && !matches!(b[n - 1], b'l' | b's' | b'z' | b'e') {
        return stem[..n - 1].to_string();
    }
    const E_ENDINGS: [&str; 10] = ["at", "bl", "iz", "iv", "lv", "rg", "uc", "ur", "os", "as"];
    if E_ENDINGS.iter().any(|e| stem.ends_with(e)) {
        return format!("{stem}e");
    }
    stem.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_headers_signoffs_urls_and_digits() {
        let raw = "From: client@company.com\nTo: support@service.com\nSubject: Booking #4521\n\n\
                   Dear team, see https://example.com/b?id=9 — confirmed!!\nBest regards, Ana";
        assert_eq!(normalize(raw), "booking team see confirmed ana");
    }

    #[test]
    fn decodes_entities_before_stripping() {
        assert_eq!(normalize("Tom&nbsp;&amp;&nbsp;Jerry"), "tom jerry");
    }

    #[test]
    fn empty_and_absent_text() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  \n\t "), "");
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize_with(NormalizerMode::Rich, "123 !!! ..."), "");
    }

    #[test]
    fn rich_mode_drops_stopwords_and_lemmatizes() {
        let out = normalize_with(
            NormalizerMode::Rich,
            "We are escalating this: the invoices were not paid and replies stopped.",
        );
        assert_eq!(out, "escalate invoice not pay reply stop");
    }

    #[test]
    fn lemma_examples() {
        assert_eq!(lemmatize("confirmed"), "confirm");
        assert_eq!(lemmatize("confirms"), "confirm");
        assert_eq!(lemmatize("replies"), "reply");
        assert_eq!(lemmatize("closed"), "close");
        assert_eq!(lemmatize("shipping"), "ship");
        assert_eq!(lemmatize("address"), "address");
        assert_eq!(lemmatize("status"), "status");
        assert_eq!(lemmatize("sent"), "send");
    }

    #[test]
    fn lemmatize_is_a_fixed_point() {
        for w in [
            "releasing", "embedded", "processes", "agreed", "biased", "focusing", "meetings",
            "classes", "went", "companies",
        ] {
            let once = lemmatize(w);
            assert_eq!(lemmatize(&once), once, "lemma of {w} not stable");
        }
    }

    #[test]
    fn both_modes_idempotent() {
        let samples = [
            "Hi, I OBJECT to the charge of $45.00 on 12/03!!",
            "RE: FW: Please escalate to your manager ASAP — www.corp.io/ticket",
            "Attached are the updated shipping addresses; thanks, Bob",
            "İstanbul office confirmed the booking ½ done",
            "",
        ];
        for s in samples {
            for mode in [NormalizerMode::Basic, NormalizerMode::Rich] {
                let once = normalize_with(mode, s);
                assert_eq!(normalize_with(mode, &once), once, "{mode:?} not idempotent on {s:?}");
            }
        }
    }
}
