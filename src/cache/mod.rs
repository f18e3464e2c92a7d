//! In-memory feed cache: per-feed bounded entry lists plus the global
//! eviction policy.
//!
//! Everything here is plain synchronous state. The engine task is the
//! single owner and serializes all access; nothing in this module is
//! shared across threads.

mod entry;
mod state;

pub use entry::FeedCacheEntry;
pub use state::CacheState;
