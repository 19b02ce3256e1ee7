//! Durable TTL store.
//!
//! A key-value store partitioned by entity type, where every partition has
//! its own time-to-live. Expiry is lazy: an entry whose `expires_at` has
//! passed is invisible to reads immediately, and is physically removed only
//! when the partition is swept.
//!
//! # Example
//!
//! ```ignore
//! let store: Arc<dyn TtlStore> = Arc::new(LmdbTtlStore::open(path, 256, policies, clock)?);
//!
//! store.set_json(Partition::Item, "42", &json!({"text": "hello"}))?;
//! let item: Option<serde_json::Value> = store.get_json(Partition::Item, "42")?;
//!
//! // Reclaim space in the background; reads do not depend on it.
//! let sweeper = spawn_sweeper(store.clone(), Duration::from_secs(600));
//! ```

mod entry;
pub mod lmdb_backend;
pub mod memory;
pub mod sweeper;
pub mod traits;

pub use lmdb_backend::{open_environment, LmdbTtlStore};
pub use memory::InMemoryTtlStore;
pub use sweeper::{spawn_sweeper, sweep_all, SweeperHandle};
pub use traits::{CacheEntry, StoreStats, TtlStore, TtlStoreExt};
