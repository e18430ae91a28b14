//! SQLite storage backend for Replay.
//!
//! [`SqliteCache`] persists cache entries in a single SQLite database file
//! (or in memory) and implements the
//! [`ResponseCache`](replay_core::ResponseCache) trait. Repeated string
//! values (prompts, system prompts, string parameters) are deduplicated
//! into one interned-string table, and every entry carries creation and
//! last-access timestamps for age-based purging.
//!
//! One `SqliteCache` may be shared by any number of model wrappers, and one
//! database file may be shared by multiple processes: uniqueness is enforced
//! by the schema itself, so a race between two writers inserting the same
//! call resolves to a single entry.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use replay_sqlite::{SqliteCache, SqliteCacheConfig};
//!
//! # fn example() -> Result<(), replay_core::ReplayError> {
//! // In-memory cache (great for testing)
//! let cache = SqliteCache::in_memory()?;
//!
//! // File-based cache with a custom busy timeout
//! let config = SqliteCacheConfig::new("/var/lib/myapp/replay.db")
//!     .with_busy_timeout(std::time::Duration::from_secs(10));
//! let cache = SqliteCache::new(config)?;
//! # Ok(())
//! # }
//! ```

mod cache;

pub use cache::{SqliteCache, SqliteCacheConfig};

// Re-export core types for convenience.
pub use replay_core::{CacheEntry, PurgeFilter, ReplayError, ResponseCache};
