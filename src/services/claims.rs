//! Deterministic claim-candidate selection.
//!
//! Sentences are scored without any external call: syntactic cues (causal
//! connectives, quantities, temporal anchors, named authorities) combined
//! with lexical cues (evidentiary verbs outweigh hedges) and a length-band
//! bonus for plausible claim length. The best-scoring sentence becomes the
//! fact-check prompt when it clears the confidence threshold.

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum score for a candidate to replace the full text as the prompt.
pub const CONFIDENCE_THRESHOLD: f64 = 0.4;

const MAX_SENTENCES: usize = 50;

static CAUSAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(because of|leads to|as a result|therefore|due to|results in|caused by)\b")
        .expect("causal pattern")
});
static QUANTITATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d+(\.\d+)?\s*%|\b\d+\s+(times|percent)\b|\b(majority|minority|doubled|tripled)\b")
        .expect("quantitative pattern")
});
static TEMPORAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(in|since|by|until)\s+(19|20)\d{2}\b|\bover the (last|past)\b")
        .expect("temporal pattern")
});
static AUTHORITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(university|institute|study|research|researchers|professor|doctor|scientists|according to)\b")
        .expect("authority pattern")
});

/// Strong evidentiary verbs.
const HIGH_INDICATORS: &[&str] = &[
    "study", "proven", "demonstrated", "established", "confirmed", "measured", "discovered",
];
/// Moderate evidentiary language.
const MEDIUM_INDICATORS: &[&str] = &[
    "shows", "results", "indicates", "analysis", "reported", "found",
];
/// Hedging language.
const LOW_INDICATORS: &[&str] = &["may", "might", "could", "possibly", "perhaps"];

/// A scored sentence.
#[derive(Debug, Clone)]
pub struct ClaimCandidate {
    pub text: String,
    pub confidence: f64,
}

/// Extraction output: the winning sentence plus runners-up.
#[derive(Debug, Clone)]
pub struct ClaimExtraction {
    pub best_claim: String,
    pub confidence: f64,
    pub candidates: Vec<ClaimCandidate>,
}

fn normalize(text: &str) -> String {
    text.replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split on sentence-ending punctuation followed by whitespace, and on
/// newlines.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' || c == '\r' {
            if !current.trim().is_empty() {
                sentences.push(normalize(&current));
            }
            current.clear();
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            if chars.peek().map_or(true, |next| next.is_whitespace()) {
                if !current.trim().is_empty() {
                    sentences.push(normalize(&current));
                }
                current.clear();
            }
        }
    }
    if !current.trim().is_empty() {
        sentences.push(normalize(&current));
    }
    sentences
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

fn score_syntactic(sentence: &str) -> f64 {
    let mut score: f64 = 0.0;
    if CAUSAL.is_match(sentence) {
        score += 0.18;
    }
    if QUANTITATIVE.is_match(sentence) {
        score += 0.18;
    }
    if TEMPORAL.is_match(sentence) {
        score += 0.12;
    }
    if AUTHORITY.is_match(sentence) {
        score += 0.15;
    }
    score.min(1.0)
}

fn score_lexical(sentence: &str) -> f64 {
    let lower = sentence.to_lowercase();
    let mut score: f64 = 0.0;
    for word in HIGH_INDICATORS {
        if lower.contains(word) {
            score += 0.45;
        }
    }
    for word in MEDIUM_INDICATORS {
        if lower.contains(word) {
            score += 0.25;
        }
    }
    for word in LOW_INDICATORS {
        if lower.contains(word) {
            score += 0.08;
        }
    }
    let word_count = tokenize(sentence).len();
    if (5..=40).contains(&word_count) {
        score += 0.22;
    }
    score.min(1.0)
}

/// Score every sentence and return the ranked candidates, or `None` when the
/// text yields no usable sentence. Ties keep original sentence order (stable
/// sort).
pub fn extract(text: &str) -> Option<ClaimExtraction> {
    let mut sentences: Vec<String> = split_sentences(text)
        .into_iter()
        .filter(|s| (10..=400).contains(&s.chars().count()))
        .collect();
    if sentences.is_empty() {
        return None;
    }
    sentences.truncate(MAX_SENTENCES);

    let mut candidates: Vec<ClaimCandidate> = sentences
        .into_iter()
        .map(|text| {
            let confidence = score_syntactic(&text) * 0.4 + score_lexical(&text) * 0.6;
            ClaimCandidate { text, confidence }
        })
        .collect();
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

    let best = candidates.first()?.clone();
    Some(ClaimExtraction {
        best_claim: best.text,
        confidence: best.confidence,
        candidates: candidates.into_iter().take(3).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_nothing() {
        assert!(extract("").is_none());
        assert!(extract("short.").is_none());
    }

    #[test]
    fn factual_sentence_outranks_filler() {
        let text = "Hello everyone and welcome back to the channel. \
                    A 2019 Harvard University study demonstrated that sea levels rose 20% faster than predicted. \
                    Don't forget to like and subscribe!";
        let extraction = extract(text).expect("candidates");
        assert!(extraction.best_claim.contains("Harvard"));
        assert!(extraction.confidence > CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn hedged_chatter_stays_below_threshold() {
        let text = "Maybe we could possibly hang out sometime soon, who knows really.";
        let extraction = extract(text).expect("candidates");
        assert!(extraction.confidence < CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn ties_preserve_original_order() {
        let text = "The quick brown fox jumps over one lazy dog. \
                    The slow brown fox jumps over one lazy dog.";
        let extraction = extract(text).expect("candidates");
        assert!(extraction.best_claim.starts_with("The quick"));
    }

    #[test]
    fn scoring_is_deterministic() {
        let text = "Researchers found that inflation doubled in 2023. Other things happened too.";
        let a = extract(text).unwrap();
        let b = extract(text).unwrap();
        assert_eq!(a.best_claim, b.best_claim);
        assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn overlong_sentences_are_skipped() {
        let long = "word ".repeat(200);
        assert!(extract(&long).is_none());
    }

    #[test]
    fn sentence_splitting_handles_newlines() {
        let sentences = split_sentences("First line\nSecond line. Third one!");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "First line");
    }
}
