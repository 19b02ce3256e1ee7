//! Immutable snapshot contents and their derived indexes.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use wren_core::{
    AccountRecord, ArchiveRows, Attribution, ContentItem, LikedItem, MembershipSet, UserRecord,
};

/// Record counts and index sizes of a loaded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub items: usize,
    pub likes: usize,
    pub users: usize,
    pub blocked: usize,
    pub muted: usize,
    /// Distinct author ids in the by-author index.
    pub authors: usize,
    /// Distinct parent ids in the by-parent index, including missing parents.
    pub reply_parents: usize,
    pub attributions: usize,
    pub loaded_at: DateTime<Utc>,
    pub load_duration_ms: u64,
}

/// One fully built snapshot generation.
///
/// Everything except the liked records and the attribution map is frozen
/// once built. Those two are `DashMap`s so a patch locks one shard only.
#[derive(Debug)]
pub struct SnapshotData {
    items: HashMap<String, ContentItem>,
    /// Author id to item ids, newest first.
    by_author: HashMap<String, Vec<String>>,
    /// Parent id to reply ids, oldest first.
    by_parent: HashMap<String, Vec<String>>,
    /// All item ids, newest first.
    recent: Vec<String>,
    likes: DashMap<String, LikedItem>,
    /// Liked ids, most recently liked first. Likes without a timestamp sort last.
    likes_order: Vec<String>,
    attributions: DashMap<String, Attribution>,
    users: HashMap<String, UserRecord>,
    members: HashMap<MembershipSet, HashSet<String>>,
    account: Option<AccountRecord>,
    loaded_at: DateTime<Utc>,
    load_duration: Duration,
}

impl SnapshotData {
    /// Build a generation from raw rows. Duplicate ids keep the last row.
    pub fn build(rows: ArchiveRows, loaded_at: DateTime<Utc>, load_duration: Duration) -> Self {
        let mut items: HashMap<String, ContentItem> = HashMap::with_capacity(rows.items.len());
        for item in rows.items {
            items.insert(item.id.clone(), item);
        }

        let mut by_author: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_parent: HashMap<String, Vec<String>> = HashMap::new();
        for item in items.values() {
            if let Some(author) = &item.author_id {
                by_author.entry(author.clone()).or_default().push(item.id.clone());
            }
            if let Some(parent) = &item.parent_id {
                by_parent.entry(parent.clone()).or_default().push(item.id.clone());
            }
        }

        let newest_first = |ids: &mut Vec<String>| {
            ids.sort_by(|a, b| {
                let (ia, ib) = (&items[a], &items[b]);
                ib.created_at.cmp(&ia.created_at).then_with(|| a.cmp(b))
            });
        };
        for ids in by_author.values_mut() {
            newest_first(ids);
        }
        for ids in by_parent.values_mut() {
            ids.sort_by(|a, b| {
                let (ia, ib) = (&items[a], &items[b]);
                ia.created_at.cmp(&ib.created_at).then_with(|| a.cmp(b))
            });
        }
        let mut recent: Vec<String> = items.keys().cloned().collect();
        newest_first(&mut recent);

        let likes: DashMap<String, LikedItem> = DashMap::with_capacity(rows.likes.len());
        for like in rows.likes {
            likes.insert(like.item_id.clone(), like);
        }
        let mut likes_order: Vec<(Reverse<Option<DateTime<Utc>>>, String)> = likes
            .iter()
            .map(|entry| (Reverse(entry.liked_at), entry.key().clone()))
            .collect();
        likes_order.sort();
        let likes_order: Vec<String> = likes_order.into_iter().map(|(_, id)| id).collect();

        let mut members = HashMap::new();
        members.insert(MembershipSet::Liked, likes_order.iter().cloned().collect());
        members.insert(MembershipSet::Blocked, rows.blocked.into_iter().collect());
        members.insert(MembershipSet::Muted, rows.muted.into_iter().collect());

        let users = rows
            .users
            .into_iter()
            .map(|user| (user.id.clone(), user))
            .collect();

        Self {
            items,
            by_author,
            by_parent,
            recent,
            likes,
            likes_order,
            attributions: DashMap::new(),
            users,
            members,
            account: rows.account,
            loaded_at,
            load_duration,
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ContentItem> {
        self.items.get(id)
    }

    /// Items by one author, newest first.
    pub fn get_by_author(&self, author_id: &str, limit: usize) -> Vec<ContentItem> {
        self.by_author
            .get(author_id)
            .map(|ids| self.collect(ids.iter().take(limit)))
            .unwrap_or_default()
    }

    /// Direct replies to `id`, oldest first. `id` need not be in the archive.
    pub fn get_replies_to(&self, id: &str) -> Vec<ContentItem> {
        self.by_parent
            .get(id)
            .map(|ids| self.collect(ids.iter()))
            .unwrap_or_default()
    }

    pub fn recent_items(&self, limit: usize) -> Vec<ContentItem> {
        self.collect(self.recent.iter().take(limit))
    }

    /// Items by `author_id` with no likes and no reposts.
    pub fn zero_engagement(&self, author_id: &str) -> Vec<ContentItem> {
        self.by_author
            .get(author_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.items.get(id))
                    .filter(|item| !item.has_engagement())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Walk parent links from `id`, starting with the item itself.
    ///
    /// Stops at a parent that is not in the archive, at the first repeated id,
    /// or after `max_depth` items.
    pub fn conversation_chain(&self, id: &str, max_depth: usize) -> Vec<ContentItem> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if chain.len() >= max_depth || !visited.insert(current) {
                break;
            }
            let Some(item) = self.items.get(current) else {
                break;
            };
            chain.push(item.clone());
            cursor = item.parent_id.as_deref();
        }
        chain
    }

    pub fn get_liked(&self, item_id: &str) -> Option<LikedItem> {
        self.likes.get(item_id).map(|entry| entry.value().clone())
    }

    /// Liked items, most recently liked first.
    pub fn liked_items(&self, limit: usize) -> Vec<LikedItem> {
        self.likes_order
            .iter()
            .filter_map(|id| self.get_liked(id))
            .take(limit)
            .collect()
    }

    /// Liked items that still have no author username.
    pub fn unattributed_likes(&self, limit: usize) -> Vec<LikedItem> {
        self.likes_order
            .iter()
            .filter_map(|id| self.get_liked(id))
            .filter(|like| !like.is_attributed())
            .take(limit)
            .collect()
    }

    pub fn get_user(&self, id: &str) -> Option<&UserRecord> {
        self.users.get(id)
    }

    pub fn account(&self) -> Option<&AccountRecord> {
        self.account.as_ref()
    }

    pub fn is_member(&self, set: MembershipSet, id: &str) -> bool {
        self.members.get(&set).is_some_and(|ids| ids.contains(id))
    }

    /// Attribution patched in since this generation was loaded.
    pub fn attribution_for(&self, item_id: &str) -> Option<Attribution> {
        self.attributions.get(item_id).map(|entry| entry.value().clone())
    }

    /// Patch one record with a newly accepted attribution.
    pub fn apply_attribution(&self, item_id: &str, attribution: &Attribution) -> bool {
        let liked = match self.likes.get_mut(item_id) {
            Some(mut like) => {
                like.author_username = Some(attribution.username.clone());
                if attribution.display_name.is_some() {
                    like.author_display_name = attribution.display_name.clone();
                }
                if attribution.author_id.is_some() {
                    like.author_id = attribution.author_id.clone();
                }
                true
            }
            None => false,
        };

        if !liked && !self.items.contains_key(item_id) {
            return false;
        }
        self.attributions
            .insert(item_id.to_string(), attribution.clone());
        true
    }

    pub fn stats(&self) -> SnapshotStats {
        let set_len = |set: MembershipSet| self.members.get(&set).map_or(0, HashSet::len);
        SnapshotStats {
            items: self.items.len(),
            likes: self.likes.len(),
            users: self.users.len(),
            blocked: set_len(MembershipSet::Blocked),
            muted: set_len(MembershipSet::Muted),
            authors: self.by_author.len(),
            reply_parents: self.by_parent.len(),
            attributions: self.attributions.len(),
            loaded_at: self.loaded_at,
            load_duration_ms: u64::try_from(self.load_duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Vec<ContentItem> {
        ids.filter_map(|id| self.items.get(id)).cloned().collect()
    }
}
