//! The built-in resolution strategies, cheapest first.

mod alternate;
mod batch_remote;
mod cached;
mod own_archive;
mod text_pattern;

pub use alternate::AlternateSourceLookup;
pub use batch_remote::BatchRemoteLookup;
pub use cached::CachedLookup;
pub use own_archive::OwnArchiveLookup;
pub use text_pattern::{extract_author, TextPatternExtraction};
