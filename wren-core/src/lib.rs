//! wren core types
//!
//! Data structures, errors and configuration shared by the storage and
//! resolution crates. Backend traits for the relational archive and for the
//! remote lookup services live here too, so test doubles can implement them
//! without depending on the crates that consume them.

mod archive;
mod clock;
mod config;
mod entities;
mod error;
mod lookup;
mod partition;
pub mod telemetry;

pub use archive::{ArchiveRows, ArchiveSource, MemoryArchive};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{BudgetPolicy, ResolverConfig, StoreConfig, WrenConfig};
pub use entities::{
    AccountRecord, Attribution, AttributionRecord, Confidence, ContentItem, LikedItem,
    MembershipSet, UserRecord,
};
pub use error::{
    ArchiveError, ConfigError, LookupError, ResolveError, SnapshotError, StoreError, WrenError,
    WrenResult,
};
pub use lookup::{AuthorLookup, MirrorLookup, RemoteAuthor};
pub use partition::{Partition, PartitionPolicies, PartitionPolicy};
pub use telemetry::TelemetryConfig;
