//! Replay — a persistent, transparent response cache for generative-model
//! calls.
//!
//! This crate re-exports the Replay sub-crates for convenient single-import
//! usage. Enable features to control which modules are available.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `default` | `cache` |
//! | `cache` | `InMemoryCache` and the `CachedModel` decorator |
//! | `sqlite` | `SqliteCache`: durable storage shared across wrappers and processes |
//! | `model-utils` | `ScriptedModel` / `EchoModel` test doubles |
//! | `full` | All of the above |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use replay::cache::CachedModel;
//! use replay::core::{GenerativeModel, ModelParams, PurgeFilter};
//! use replay::sqlite::SqliteCache;
//! ```

/// Core types and traits: `GenerativeModel`, `ResponseCache`, `CacheRequest`,
/// `ModelValue`, `ReplayError`, and friends. Always available.
pub use replay_core as core;

/// `InMemoryCache` and the `CachedModel` get-or-compute decorator.
#[cfg(feature = "cache")]
pub use replay_cache as cache;

/// SQLite-backed persistent cache.
#[cfg(feature = "sqlite")]
pub use replay_sqlite as sqlite;

/// Model test doubles.
#[cfg(feature = "model-utils")]
pub use replay_models as models;
