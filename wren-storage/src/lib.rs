//! WREN Storage - durable TTL store, credential cache and archive snapshot.
//!
//! Two storage levels:
//!
//! - the durable TTL store ([`cache`]), the single source of truth for
//!   everything resolved or fetched at runtime, plus the credential
//!   validation cache and fetch watermarks sharing its LMDB environment;
//! - the in-memory [`Snapshot`], a read replica of the archive built from an
//!   [`wren_core::ArchiveSource`] such as [`SqliteArchive`].

pub mod cache;
pub mod credentials;
pub mod fetch_log;
pub mod snapshot;
pub mod sqlite_archive;

pub use cache::{
    open_environment, spawn_sweeper, sweep_all, CacheEntry, InMemoryTtlStore, LmdbTtlStore,
    StoreStats, SweeperHandle, TtlStore, TtlStoreExt,
};
pub use credentials::{
    AuthKind, CredentialCache, CredentialHash, CredentialValidationRecord, ValidationStatus,
};
pub use fetch_log::{FetchKind, FetchLog};
pub use snapshot::{Snapshot, SnapshotData, SnapshotStats};
pub use sqlite_archive::SqliteArchive;
