//! WREN Resolve - author resolution for archived items.
//!
//! An ordered set of [`ResolutionStrategy`] implementations, from an exact
//! read of previously committed attributions to heuristics over the item's
//! text, driven by the [`AuthorResolver`] pipeline.
//!
//! # Example
//!
//! ```ignore
//! let resolver = AuthorResolver::builder(store)
//!     .config(config.resolver.clone())
//!     .snapshot(snapshot)
//!     .remote(Arc::new(api_client))
//!     .mirror(Arc::new(mirror))
//!     .build()?;
//!
//! match resolver.resolve(&ResolutionItem::from_liked(&like)).await? {
//!     ResolutionOutcome::Accepted(attribution) => println!("@{}", attribution.username),
//!     ResolutionOutcome::Exhausted { deferred } => println!("retry later: {:?}", deferred),
//! }
//! ```

pub mod budget;
pub mod pipeline;
pub mod report;
pub mod strategies;
pub mod strategy;

pub use budget::{BudgetExhausted, RateBudget};
pub use pipeline::{
    AuthorResolver, AuthorResolverBuilder, CancelToken, ResolutionAttempt, ResolutionOutcome,
};
pub use report::EnrichmentReport;
pub use strategies::{
    extract_author, AlternateSourceLookup, BatchRemoteLookup, CachedLookup, OwnArchiveLookup,
    TextPatternExtraction,
};
pub use strategy::{AttemptOutcome, Candidate, CostClass, ResolutionItem, ResolutionStrategy};
