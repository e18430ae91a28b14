use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use replay_core::{now_millis, CacheEntry, Fingerprint, PurgeFilter, ReplayError, ResponseCache};

/// In-memory response cache.
///
/// Entries are keyed by the full [`Fingerprint`], so lookup semantics match
/// the persistent store: exact set equality over model id and typed
/// parameters. Duplicate inserts fail with
/// [`ReplayError::DuplicateEntry`] just like they do against the SQLite
/// backend, which keeps the decorator's race handling uniform across stores.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<Fingerprint, StoredEntry>>,
    next_id: AtomicI64,
}

struct StoredEntry {
    id: i64,
    responses: Vec<String>,
    created_at: i64,
    accessed_at: i64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseCache for InMemoryCache {
    async fn probe(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, ReplayError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ReplayError::Storage(format!("lock: {e}")))?;

        Ok(entries.get_mut(fingerprint).map(|entry| {
            entry.accessed_at = now_millis();
            CacheEntry {
                id: entry.id,
                responses: entry.responses.clone(),
                created_at: entry.created_at,
                accessed_at: entry.accessed_at,
            }
        }))
    }

    async fn insert(
        &self,
        fingerprint: &Fingerprint,
        responses: &[String],
    ) -> Result<i64, ReplayError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ReplayError::Storage(format!("lock: {e}")))?;

        if entries.contains_key(fingerprint) {
            return Err(ReplayError::DuplicateEntry);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let now = now_millis();
        entries.insert(
            fingerprint.clone(),
            StoredEntry {
                id,
                responses: responses.to_vec(),
                created_at: now,
                accessed_at: now,
            },
        );
        Ok(id)
    }

    async fn purge(&self, filter: &PurgeFilter) -> Result<u64, ReplayError> {
        filter.validate()?;

        let mut entries = self
            .entries
            .write()
            .map_err(|e| ReplayError::Storage(format!("lock: {e}")))?;

        let before = entries.len();
        entries.retain(|fingerprint, entry| {
            if let Some(model_id) = &filter.model_id {
                if fingerprint.model_id() != model_id {
                    return true;
                }
            }
            if let Some(t) = filter.created_before {
                if entry.created_at >= t {
                    return true;
                }
            }
            if let Some(t) = filter.accessed_before {
                if entry.accessed_at >= t {
                    return true;
                }
            }
            false
        });
        Ok((before - entries.len()) as u64)
    }
}
