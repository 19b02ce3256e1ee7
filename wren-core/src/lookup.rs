//! Lookup backend traits used by the remote resolution strategies.
//!
//! The wire protocol of each backend is its own business; the resolver only
//! relies on these contracts and enforces its own timeouts around them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::LookupError;

/// Author information returned by a backend for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAuthor {
    pub username: String,
    pub display_name: Option<String>,
    pub author_id: Option<String>,
    pub verified: bool,
}

impl RemoteAuthor {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: None,
            author_id: None,
            verified: false,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_author_id(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }
}

/// Authoritative remote source answering many ids per call.
///
/// Ids absent from the returned map had no result.
#[async_trait]
pub trait AuthorLookup: Send + Sync {
    /// Backend name for logs.
    fn backend(&self) -> &str;

    async fn lookup(&self, ids: &[String]) -> Result<HashMap<String, RemoteAuthor>, LookupError>;
}

/// Best-effort secondary source (e.g. a public mirror) answering one id per call.
#[async_trait]
pub trait MirrorLookup: Send + Sync {
    /// Mirror name, reported as the detail of an accepted attribution.
    fn mirror(&self) -> &str;

    async fn lookup(&self, id: &str) -> Result<Option<RemoteAuthor>, LookupError>;
}
