//! Lexicon-based sentiment and intent analysis
//!
//! A pure function of the input text: identical input always yields the
//! identical snapshot, which keeps sentiment behavior snapshot-testable.
//! This is intentionally simple keyword matching - richer analysis belongs
//! to the AI collaborator, not the gateway.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::core::session::{Emotions, EntrySentiment, SentimentLabel, SentimentSnapshot};

static POSITIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "thanks", "thank", "great", "good", "perfect", "awesome", "excellent", "happy", "love",
        "wonderful", "appreciate", "helpful", "resolved", "fixed", "yes",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "angry", "terrible", "awful", "broken", "wrong", "bad", "hate", "frustrated", "upset",
        "useless", "worst", "unacceptable", "ridiculous", "disappointed", "no", "problem",
        "issue", "error", "failed", "cancel",
    ]
    .into_iter()
    .collect()
});

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Analyze one utterance into a full sentiment snapshot.
pub fn analyze(text: &str) -> SentimentSnapshot {
    let mut positive = 0u32;
    let mut negative = 0u32;
    let mut total = 0u32;
    for word in tokenize(text) {
        total += 1;
        if POSITIVE_WORDS.contains(word.as_str()) {
            positive += 1;
        } else if NEGATIVE_WORDS.contains(word.as_str()) {
            negative += 1;
        }
    }

    if total == 0 {
        return SentimentSnapshot::default();
    }

    // Score in [0, 1]: 0.5 neutral, signal words push either way
    let signal = positive as f32 - negative as f32;
    let score = (0.5 + signal * 0.15).clamp(0.0, 1.0);
    let overall = if score > 0.6 {
        SentimentLabel::Positive
    } else if score < 0.4 {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    };

    let pos_ratio = (positive as f32 / total as f32).min(1.0);
    let neg_ratio = (negative as f32 / total as f32).min(1.0);
    SentimentSnapshot {
        overall,
        score,
        emotions: Emotions {
            joy: (pos_ratio * 2.0).min(1.0),
            anger: (neg_ratio * 1.5).min(1.0),
            fear: (neg_ratio * 0.5).min(1.0),
            sadness: (neg_ratio * 0.8).min(1.0),
            surprise: if text.contains('?') || text.contains('!') {
                0.3
            } else {
                0.1
            },
        },
    }
}

/// Per-entry sentiment label derived from the same analyzer.
pub fn analyze_entry(text: &str) -> EntrySentiment {
    let snapshot = analyze(text);
    EntrySentiment {
        label: snapshot.overall,
        score: snapshot.score,
    }
}

/// Classify the caller's intent from keywords. Deterministic; first match
/// in priority order wins.
pub fn detect_intent(text: &str) -> &'static str {
    let words: HashSet<String> = tokenize(text).collect();
    let lower = text.to_lowercase();
    let has = |w: &str| words.contains(w);

    if has("agent") || has("human") || has("representative") || lower.contains("speak to someone") {
        "escalation"
    } else if has("cancel") || has("cancellation") || has("unsubscribe") {
        "cancellation"
    } else if has("bill") || has("billing") || has("charge") || has("charged") || has("invoice")
        || has("refund") || has("payment")
    {
        "billing"
    } else if has("broken") || has("error") || has("bug") || has("crash") || has("technical")
        || lower.contains("not working") || lower.contains("doesn't work")
    {
        "technical"
    } else if has("hello") || has("hi") || has("hey") || lower.contains("good morning")
        || lower.contains("good afternoon")
    {
        "greeting"
    } else {
        "general"
    }
}
