//! Boundary to the relational archive the snapshot is loaded from.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::{AccountRecord, ArchiveError, ContentItem, LikedItem, UserRecord};

/// Every row the snapshot needs, as read from the archive in one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveRows {
    pub items: Vec<ContentItem>,
    pub likes: Vec<LikedItem>,
    pub users: Vec<UserRecord>,
    pub blocked: Vec<String>,
    pub muted: Vec<String>,
    pub account: Option<AccountRecord>,
}

impl ArchiveRows {
    pub fn row_count(&self) -> usize {
        self.items.len() + self.likes.len() + self.users.len() + self.blocked.len() + self.muted.len()
    }
}

/// A durable relational store that can produce a full set of archive rows.
///
/// Implementations perform blocking I/O; callers on an async runtime should
/// load from a blocking context.
pub trait ArchiveSource: Send + Sync {
    fn load_rows(&self) -> Result<ArchiveRows, ArchiveError>;
}

/// Archive source held entirely in memory.
///
/// Rows can be swapped between loads and the source can be marked
/// unavailable to exercise cold-snapshot handling.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    rows: RwLock<ArchiveRows>,
    unavailable: AtomicBool,
    loads: AtomicUsize,
}

impl MemoryArchive {
    pub fn new(rows: ArchiveRows) -> Self {
        Self {
            rows: RwLock::new(rows),
            unavailable: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn replace_rows(&self, rows: ArchiveRows) {
        match self.rows.write() {
            Ok(mut guard) => *guard = rows,
            Err(poisoned) => *poisoned.into_inner() = rows,
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `load_rows` calls so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ArchiveSource for MemoryArchive {
    fn load_rows(&self) -> Result<ArchiveRows, ArchiveError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable {
                reason: "memory archive marked unavailable".to_string(),
            });
        }
        let rows = self
            .rows
            .read()
            .map_err(|_| ArchiveError::Unavailable {
                reason: "archive lock poisoned".to_string(),
            })?
            .clone();
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(rows)
    }
}
