//! Lexical feature extraction.
//!
//! The degraded-mode extractor and the whole of `lexical_only` mode:
//! surface regexes for mentions, keyword lexicons for valence and
//! category, and a small due-phrase parser. No model calls.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use regex::Regex;
use std::sync::LazyLock;

use crate::fingerprint::tokenize;
use crate::lexicon::{self, is_stopword};
use crate::types::{
    CommitmentPolarity, Features, MemoryCategory, PersonMention, ProposedCommitment,
};

static AT_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z][A-Za-z0-9_]*)").unwrap_or_else(|_| unreachable!()));

static CAPITALIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]+)\b").unwrap_or_else(|_| unreachable!()));

static YOU_OWE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(i'll|i will|i am going to|i'm going to|i need to|i promised|i owe)\b")
        .unwrap_or_else(|_| unreachable!())
});

static THEY_OWE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(owes me|will send me|will get me|promised me|waiting on|said they would)\b")
        .unwrap_or_else(|_| unreachable!())
});

static MUTUAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bwe\s+(agreed|will|'ll|planned|decided)\b").unwrap_or_else(|_| unreachable!())
});

static DECISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(decided|went with|settled on|chose|we'll go with)\b")
        .unwrap_or_else(|_| unreachable!())
});

static IN_N_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bin (\d{1,3}) days?\b").unwrap_or_else(|_| unreachable!()));

static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:at|in) (?:the )?([A-Z][A-Za-z]+)\b").unwrap_or_else(|_| unreachable!())
});

/// Words that look like names but are not person mentions.
const NON_NAMES: &[&str] = &[
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
    "Team",
    "Meeting",
    "Budget",
    "Project",
    "Today",
    "Tomorrow",
    "Tonight",
];

/// Verbs that mark a sentence-initial capitalized word as a person
/// ("Mike owes me...", "Sarah said...").
const RELATIONAL_VERBS: &[&str] = &[
    "owes", "will", "promised", "said", "asked", "wants", "needs", "texted", "called", "emailed",
];

/// Extract person mention surface forms: @-mentions plus capitalized
/// words that are not in the non-name list. Sentence-initial capitals are
/// usually just sentence case and are skipped unless a possessive or a
/// relational verb marks them as a name.
#[must_use]
pub fn person_surfaces(text: &str) -> Vec<String> {
    let mut surfaces: Vec<String> = Vec::new();

    for capture in AT_MENTION.captures_iter(text) {
        if let Some(name) = capture.get(1) {
            push_unique(&mut surfaces, name.as_str());
        }
    }

    let sentence_starts: Vec<usize> = sentence_start_offsets(text);
    for capture in CAPITALIZED.captures_iter(text) {
        let Some(word) = capture.get(1) else { continue };
        if NON_NAMES.contains(&word.as_str()) {
            continue;
        }
        if sentence_starts.contains(&word.start()) && !marked_as_name(text, word.end()) {
            continue;
        }
        push_unique(&mut surfaces, word.as_str());
    }

    surfaces
}

fn marked_as_name(text: &str, after: usize) -> bool {
    let rest = &text[after..];
    if rest.starts_with("'s") {
        return true;
    }
    let next_word = rest
        .split_whitespace()
        .next()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase());
    next_word.is_some_and(|word| RELATIONAL_VERBS.contains(&word.as_str()))
}

fn sentence_start_offsets(text: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut at_start = true;
    for (index, c) in text.char_indices() {
        if at_start && c.is_alphabetic() {
            offsets.push(index);
            at_start = false;
        } else if matches!(c, '.' | '!' | '?') {
            at_start = true;
        }
    }
    offsets
}

fn push_unique(surfaces: &mut Vec<String>, surface: &str) {
    if !surfaces.iter().any(|s| s.eq_ignore_ascii_case(surface)) {
        surfaces.push(surface.to_string());
    }
}

/// Parse a due phrase out of text, relative to `now`.
///
/// Recognizes today/tonight, tomorrow, weekday names ("by Friday"),
/// "next week", and "in N days". Due times land at end of day.
#[must_use]
pub fn parse_due_hint(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_lowercase();

    let target_date = if lower.contains("today") || lower.contains("tonight") {
        Some(now.date_naive())
    } else if lower.contains("tomorrow") {
        Some(now.date_naive() + Duration::days(1))
    } else if lower.contains("next week") {
        Some(now.date_naive() + Duration::days(7))
    } else if let Some(capture) = IN_N_DAYS.captures(&lower) {
        capture
            .get(1)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .map(|days| now.date_naive() + Duration::days(days))
    } else {
        weekday_in_text(&lower).map(|weekday| {
            let today = now.date_naive().weekday().num_days_from_monday() as i64;
            let target = weekday.num_days_from_monday() as i64;
            let ahead = (target - today).rem_euclid(7);
            now.date_naive() + Duration::days(ahead)
        })
    };

    target_date
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
}

fn weekday_in_text(lower: &str) -> Option<Weekday> {
    const DAYS: [(&str, Weekday); 7] = [
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sunday", Weekday::Sun),
    ];
    DAYS.iter()
        .find(|(name, _)| lower.contains(name))
        .map(|(_, weekday)| *weekday)
}

/// Extract features lexically from normalized text.
#[must_use]
pub fn extract(text: &str, now: DateTime<Utc>) -> Features {
    let lower = text.to_lowercase();
    let surfaces = person_surfaces(text);

    let people: Vec<PersonMention> = surfaces
        .iter()
        .map(|surface| PersonMention {
            surface: surface.clone(),
            entity_id: None,
        })
        .collect();

    let (lexicon_valence, intensity, hits) = lexicon::emotion_hits(&lower);
    let valence = if hits == 0 { 0.0 } else { lexicon_valence };
    let arousal = intensity;

    let mut commitments = Vec::new();
    let due_at = parse_due_hint(&lower, now);
    let polarity = if YOU_OWE.is_match(text) {
        Some(CommitmentPolarity::YouOwe)
    } else if THEY_OWE.is_match(text) {
        Some(CommitmentPolarity::TheyOwe)
    } else if MUTUAL.is_match(text) {
        Some(CommitmentPolarity::Mutual)
    } else {
        None
    };
    if let Some(polarity) = polarity {
        if let Some(counterparty) = surfaces.first() {
            commitments.push(ProposedCommitment {
                polarity,
                counterparty: counterparty.clone(),
                description: text.to_string(),
                due_at,
            });
        }
    }

    let category = if !commitments.is_empty() {
        MemoryCategory::Commitment
    } else if text.trim_end().ends_with('?') {
        MemoryCategory::Question
    } else if DECISION.is_match(text) {
        MemoryCategory::Decision
    } else {
        MemoryCategory::Observation
    };

    let topics: Vec<String> = {
        let mut seen = Vec::new();
        for token in tokenize(text) {
            if token.len() > 3 && !is_stopword(&token) && !seen.contains(&token) {
                seen.push(token);
            }
            if seen.len() >= 8 {
                break;
            }
        }
        seen
    };

    let locations: Vec<String> = LOCATION
        .captures_iter(text)
        .filter_map(|capture| capture.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| !surfaces.iter().any(|s| s.eq_ignore_ascii_case(name)))
        .collect();

    let sensitive_topics: Vec<String> = lexicon::SENSITIVE_TOPICS
        .iter()
        .filter(|topic| lower.contains(**topic) || related_sensitive(&lower, topic))
        .map(|topic| (*topic).to_string())
        .collect();

    Features {
        people,
        topics,
        locations,
        category,
        valence,
        arousal,
        commitments,
        novelty_tokens: Vec::new(),
        sensitive_topics,
        degraded: false,
    }
}

// A few sensitive topics hide behind other phrasings.
fn related_sensitive(lower: &str, topic: &str) -> bool {
    match topic {
        "death" => lower.contains("passed away") || lower.contains("died"),
        "illness" => lower.contains("diagnosed") || lower.contains("hospital"),
        "firing" => lower.contains("laid off") || lower.contains("fired"),
        _ => false,
    }
}
