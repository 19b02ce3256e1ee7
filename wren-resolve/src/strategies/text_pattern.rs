//! Author extraction from item text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use wren_core::{Confidence, StoreError};

use crate::strategy::{AttemptOutcome, Candidate, CostClass, ResolutionItem, ResolutionStrategy};

static REPOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"RT @([A-Za-z0-9_]+):").expect("Invalid repost regex"));

static QUOTED_HANDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"([^"]+)" - @([A-Za-z0-9_]+)"#).expect("Invalid quoted handle regex")
});
static NAMED_QUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^([^:"]+): "([^"]+)""#).expect("Invalid named quote regex"));
static HANDLE_SAYS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+) says:").expect("Invalid says regex"));

static SELF_REFERENCES: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\bI am @?([A-Za-z0-9_]+)").expect("Invalid self reference regex"),
        Regex::new(r"(?i)\bMy name is ([^.!?]+)").expect("Invalid self reference regex"),
        Regex::new(r"(?i)\bFollow me @([A-Za-z0-9_]+)").expect("Invalid self reference regex"),
    ]
});

const REPOST_CONFIDENCE: f64 = 0.9;
const QUOTE_CONFIDENCE: f64 = 0.7;
const SELF_REFERENCE_CONFIDENCE: f64 = 0.6;

/// Loose names become handles: lower case, no whitespace.
fn handle_from_name(name: &str) -> String {
    name.split_whitespace().collect::<String>().to_lowercase()
}

/// Best candidate found in `text`, trying the most specific pattern first.
///
/// `detail` is `retweet_pattern`, `quote_pattern` or `self_reference`.
pub fn extract_author(text: &str) -> Option<Candidate> {
    if let Some(caps) = REPOST.captures(text) {
        let username = &caps[1];
        return Some(
            Candidate::new(username, Confidence::new(REPOST_CONFIDENCE))
                .with_display_name(username)
                .with_detail("retweet_pattern"),
        );
    }

    if let Some(caps) = QUOTED_HANDLE.captures(text) {
        return Some(
            Candidate::new(&caps[2], Confidence::new(QUOTE_CONFIDENCE))
                .with_display_name(&caps[1])
                .with_detail("quote_pattern"),
        );
    }
    if let Some(caps) = NAMED_QUOTE.captures(text) {
        let name = caps[1].trim();
        if !name.is_empty() {
            return Some(
                Candidate::new(handle_from_name(name), Confidence::new(QUOTE_CONFIDENCE))
                    .with_display_name(name)
                    .with_detail("quote_pattern"),
            );
        }
    }
    if let Some(caps) = HANDLE_SAYS.captures(text) {
        let username = &caps[1];
        return Some(
            Candidate::new(username, Confidence::new(QUOTE_CONFIDENCE))
                .with_display_name(username)
                .with_detail("quote_pattern"),
        );
    }

    SELF_REFERENCES.iter().find_map(|pattern| {
        let caps = pattern.captures(text)?;
        let name = caps[1].trim();
        if name.is_empty() {
            return None;
        }
        Some(
            Candidate::new(handle_from_name(name), Confidence::new(SELF_REFERENCE_CONFIDENCE))
                .with_display_name(name)
                .with_detail("self_reference"),
        )
    })
}

/// Heuristic last resort over the item's own text.
pub struct TextPatternExtraction {
    min_accept: Confidence,
}

impl TextPatternExtraction {
    pub fn new(min_accept: Confidence) -> Self {
        Self { min_accept }
    }
}

impl Default for TextPatternExtraction {
    fn default() -> Self {
        Self::new(Confidence::new(0.7))
    }
}

#[async_trait]
impl ResolutionStrategy for TextPatternExtraction {
    fn name(&self) -> &'static str {
        "text_pattern"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::LocalHeuristic
    }

    fn min_accept(&self) -> Confidence {
        self.min_accept
    }

    async fn attempt(&self, item: &ResolutionItem) -> Result<AttemptOutcome, StoreError> {
        Ok(item
            .text
            .as_deref()
            .and_then(extract_author)
            .map_or(AttemptOutcome::NoResult, AttemptOutcome::Found))
    }
}
