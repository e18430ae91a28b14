mod cached_model;
mod in_memory;

pub use cached_model::CachedModel;
pub use in_memory::InMemoryCache;

// Re-export the cache types from core so downstream crates can depend on
// this crate alone.
pub use replay_core::{CacheEntry, PurgeFilter, ResponseCache};
