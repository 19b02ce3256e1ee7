//! Archive records and attribution types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ============================================================================
// ARCHIVE RECORDS
// ============================================================================

/// A content item (post) from the account's own archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    /// The item this one replies to. May reference an item that is not in
    /// the archive, or form a cycle in malformed data.
    pub parent_id: Option<String>,
    pub conversation_id: Option<String>,
    pub in_reply_to_username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub favorite_count: u64,
    pub retweet_count: u64,
    pub lang: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    /// Minimal item, mostly useful for fixtures.
    pub fn new(id: impl Into<String>, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            author_id: None,
            parent_id: None,
            conversation_id: None,
            in_reply_to_username: None,
            created_at,
            favorite_count: 0,
            retweet_count: 0,
            lang: None,
            deleted_at: None,
        }
    }

    pub fn with_author(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_engagement(mut self, favorites: u64, retweets: u64) -> Self {
        self.favorite_count = favorites;
        self.retweet_count = retweets;
        self
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_engagement(&self) -> bool {
        self.favorite_count > 0 || self.retweet_count > 0
    }
}

/// An item the account liked. Author fields start empty for most archives
/// and are filled in by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikedItem {
    pub item_id: String,
    pub text: Option<String>,
    pub expanded_url: Option<String>,
    pub liked_at: Option<DateTime<Utc>>,
    pub author_id: Option<String>,
    pub author_username: Option<String>,
    pub author_display_name: Option<String>,
}

impl LikedItem {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            text: None,
            expanded_url: None,
            liked_at: None,
            author_id: None,
            author_username: None,
            author_display_name: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_liked_at(mut self, liked_at: DateTime<Utc>) -> Self {
        self.liked_at = Some(liked_at);
        self
    }

    pub fn is_attributed(&self) -> bool {
        self.author_username.is_some()
    }
}

/// A known user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub profile_url: Option<String>,
}

/// The archive owner's account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub username: String,
    pub display_name: Option<String>,
}

/// Named id sets kept by the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipSet {
    Liked,
    Blocked,
    Muted,
}

impl MembershipSet {
    pub fn name(&self) -> &'static str {
        match self {
            MembershipSet::Liked => "liked",
            MembershipSet::Blocked => "blocked",
            MembershipSet::Muted => "muted",
        }
    }
}

impl fmt::Display for MembershipSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MembershipSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "liked" => Ok(MembershipSet::Liked),
            "blocked" => Ok(MembershipSet::Blocked),
            "muted" => Ok(MembershipSet::Muted),
            other => Err(ConfigError::InvalidValue {
                field: "membership_set".to_string(),
                value: other.to_string(),
                reason: "expected liked, blocked or muted".to_string(),
            }),
        }
    }
}

// ============================================================================
// ATTRIBUTION
// ============================================================================

/// A confidence score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    pub const CERTAIN: Confidence = Confidence(1.0);
    pub const NONE: Confidence = Confidence(0.0);

    /// Clamp into `[0, 1]`. NaN maps to zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::NONE;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Whether this score meets an acceptance threshold.
    pub fn meets(&self, threshold: Confidence) -> bool {
        self.0 >= threshold.0
    }
}

impl TryFrom<f64> for Confidence {
    type Error = ConfigError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::InvalidValue {
                field: "confidence".to_string(),
                value: value.to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        Ok(Self(value))
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// An accepted author attribution for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub username: String,
    pub display_name: Option<String>,
    pub author_id: Option<String>,
    pub confidence: Confidence,
    /// Name of the strategy that produced this attribution.
    pub source: String,
}

/// The attribution as persisted in the `attribution` partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub item_id: String,
    pub attribution: Attribution,
    /// Strategy-specific detail, e.g. which pattern or mirror matched.
    pub detail: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

// ============================================================================
// TESTS
// ============================================================================
