//! Shared detection state.

pub mod dedup;

pub use dedup::{AlertDeduplicator, DedupEntry};
