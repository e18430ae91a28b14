use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use replay_core::{
    now_millis, CacheEntry, Fingerprint, ModelValue, PurgeFilter, ReplayError, ResponseCache,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    id          INTEGER PRIMARY KEY,
    model_id    TEXT    NOT NULL,
    fingerprint TEXT    NOT NULL UNIQUE,
    created_at  INTEGER NOT NULL,
    accessed_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS interned_strings (
    id    INTEGER PRIMARY KEY,
    value TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS cache_params (
    id              INTEGER PRIMARY KEY,
    cache_id        INTEGER NOT NULL REFERENCES cache_entries(id) ON DELETE CASCADE,
    name            TEXT    NOT NULL,
    value_string_id INTEGER REFERENCES interned_strings(id),
    value_int       INTEGER,
    value_float     REAL,
    CHECK ((value_string_id IS NOT NULL) + (value_int IS NOT NULL) + (value_float IS NOT NULL) = 1)
);
CREATE TABLE IF NOT EXISTS cache_responses (
    id       INTEGER PRIMARY KEY,
    cache_id INTEGER NOT NULL REFERENCES cache_entries(id) ON DELETE CASCADE,
    seq      INTEGER NOT NULL,
    response TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_model_id ON cache_entries(model_id);
CREATE INDEX IF NOT EXISTS idx_cache_params_cache_name ON cache_params(cache_id, name);
";

/// Configuration for [`SqliteCache`].
#[derive(Debug, Clone)]
pub struct SqliteCacheConfig {
    path: Option<PathBuf>,
    busy_timeout: Duration,
}

impl SqliteCacheConfig {
    /// File-backed cache at the given path. The parent directory is created
    /// on open if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// In-memory cache; contents are lost when the cache is dropped.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// How long a writer waits on a locked database file before giving up.
    /// Relevant when several processes share one cache file.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

/// SQLite-backed response cache.
///
/// Entries, their typed parameters, and their responses live in four tables
/// (see the crate docs); string values are deduplicated through the
/// `interned_strings` table. Probes match on the full parameter set of an
/// entry; the fingerprint digest column only guards against concurrent
/// duplicate inserts.
///
/// SQLite operations run on the blocking thread pool
/// (`tokio::task::spawn_blocking`) so the async runtime is never stalled.
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    pub fn new(config: SqliteCacheConfig) -> Result<Self, ReplayError> {
        let conn = match &config.path {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    if !dir.as_os_str().is_empty() && !dir.exists() {
                        tracing::warn!(
                            directory = %dir.display(),
                            "cache directory does not exist, creating it"
                        );
                        std::fs::create_dir_all(dir).map_err(|e| {
                            ReplayError::Storage(format!("create cache directory: {e}"))
                        })?;
                    }
                }
                Connection::open(path)
            }
            None => Connection::open_in_memory(),
        }
        .map_err(|e| ReplayError::Storage(format!("SQLite open: {e}")))?;

        conn.busy_timeout(config.busy_timeout)
            .map_err(|e| ReplayError::Storage(format!("SQLite busy_timeout: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| ReplayError::Storage(format!("SQLite pragma: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ReplayError::Storage(format!("SQLite create tables: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Shorthand for a file-backed cache with default settings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReplayError> {
        Self::new(SqliteCacheConfig::new(path))
    }

    /// Shorthand for an in-memory cache (useful for testing).
    pub fn in_memory() -> Result<Self, ReplayError> {
        Self::new(SqliteCacheConfig::in_memory())
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, ReplayError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ReplayError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| ReplayError::Storage(format!("lock: {e}")))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| ReplayError::Storage(format!("spawn_blocking: {e}")))?
    }

    /// Insert-or-fetch a deduplicated string and return its id.
    ///
    /// Interned strings outlive the entries referencing them; use
    /// [`prune_interned_strings`](Self::prune_interned_strings) to reclaim
    /// orphans after purging.
    pub async fn intern(&self, value: impl Into<String>) -> Result<i64, ReplayError> {
        let value = value.into();
        self.with_conn(move |conn| intern_in(conn, &value)).await
    }

    /// Delete interned strings no longer referenced by any parameter row.
    /// A maintenance operation, deliberately separate from `purge`.
    pub async fn prune_interned_strings(&self) -> Result<u64, ReplayError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM interned_strings WHERE id NOT IN \
                 (SELECT value_string_id FROM cache_params WHERE value_string_id IS NOT NULL)",
                [],
            )
            .map(|n| n as u64)
            .map_err(|e| ReplayError::Storage(format!("SQLite prune: {e}")))
        })
        .await
    }

    /// Number of entries per model id.
    pub async fn count_entries(&self) -> Result<HashMap<String, u64>, ReplayError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT model_id, COUNT(*) FROM cache_entries GROUP BY model_id")
                .map_err(|e| ReplayError::Storage(format!("SQLite prepare: {e}")))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })
                .map_err(|e| ReplayError::Storage(format!("SQLite query: {e}")))?;
            let mut counts = HashMap::new();
            for row in rows {
                let (model_id, count) =
                    row.map_err(|e| ReplayError::Storage(format!("SQLite row: {e}")))?;
                counts.insert(model_id, count);
            }
            Ok(counts)
        })
        .await
    }

    /// Earliest creation time per model id, unix milliseconds.
    pub async fn earliest_creation_times(&self) -> Result<HashMap<String, i64>, ReplayError> {
        self.times_per_model("created_at", "MIN").await
    }

    /// Latest creation time per model id, unix milliseconds.
    pub async fn latest_creation_times(&self) -> Result<HashMap<String, i64>, ReplayError> {
        self.times_per_model("created_at", "MAX").await
    }

    /// Earliest access time per model id, unix milliseconds.
    pub async fn earliest_access_times(&self) -> Result<HashMap<String, i64>, ReplayError> {
        self.times_per_model("accessed_at", "MIN").await
    }

    /// Latest access time per model id, unix milliseconds.
    pub async fn latest_access_times(&self) -> Result<HashMap<String, i64>, ReplayError> {
        self.times_per_model("accessed_at", "MAX").await
    }

    async fn times_per_model(
        &self,
        field: &'static str,
        func: &'static str,
    ) -> Result<HashMap<String, i64>, ReplayError> {
        self.with_conn(move |conn| {
            let sql =
                format!("SELECT model_id, {func}({field}) FROM cache_entries GROUP BY model_id");
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ReplayError::Storage(format!("SQLite prepare: {e}")))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| ReplayError::Storage(format!("SQLite query: {e}")))?;
            let mut times = HashMap::new();
            for row in rows {
                let (model_id, timestamp) =
                    row.map_err(|e| ReplayError::Storage(format!("SQLite row: {e}")))?;
                times.insert(model_id, timestamp);
            }
            Ok(times)
        })
        .await
    }
}

#[async_trait]
impl ResponseCache for SqliteCache {
    async fn probe(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, ReplayError> {
        let fingerprint = fingerprint.clone();
        self.with_conn(move |conn| probe_in(conn, &fingerprint)).await
    }

    async fn insert(
        &self,
        fingerprint: &Fingerprint,
        responses: &[String],
    ) -> Result<i64, ReplayError> {
        let fingerprint = fingerprint.clone();
        let responses = responses.to_vec();
        self.with_conn(move |conn| insert_in(conn, &fingerprint, &responses))
            .await
    }

    async fn purge(&self, filter: &PurgeFilter) -> Result<u64, ReplayError> {
        filter.validate()?;
        let filter = filter.clone();
        self.with_conn(move |conn| purge_in(conn, &filter)).await
    }
}

fn intern_in(conn: &Connection, value: &str) -> Result<i64, ReplayError> {
    conn.execute(
        "INSERT OR IGNORE INTO interned_strings (value) VALUES (?1)",
        params![value],
    )
    .map_err(|e| ReplayError::Storage(format!("SQLite intern: {e}")))?;
    conn.query_row(
        "SELECT id FROM interned_strings WHERE value = ?1",
        params![value],
        |row| row.get(0),
    )
    .map_err(|e| ReplayError::Storage(format!("SQLite intern lookup: {e}")))
}

/// Find the entry whose parameter set exactly equals the fingerprint's.
///
/// Candidate rows are narrowed to parameters matching one of the queried
/// (name, typed value) pairs; an entry matches when it has all queried names
/// and no parameters beyond them. Matching stays relational (the digest
/// column is not consulted) so partial-match lookup modes stay open.
fn find_entry(conn: &Connection, fingerprint: &Fingerprint) -> Result<Option<i64>, ReplayError> {
    let mut sql = String::from(
        "SELECT id FROM (\
             SELECT ce.id AS id FROM cache_entries ce \
             LEFT JOIN cache_params cp ON ce.id = cp.cache_id \
             WHERE ce.model_id = ?",
    );
    let mut binds: Vec<SqlValue> = vec![SqlValue::from(fingerprint.model_id().to_string())];

    let params_set = fingerprint.params();
    if !params_set.is_empty() {
        let mut subqueries = Vec::with_capacity(params_set.len());
        for (name, value) in params_set {
            match value {
                ModelValue::Str(s) => {
                    subqueries.push(
                        "(cp.name = ? AND cp.value_string_id = \
                         (SELECT id FROM interned_strings WHERE value = ?))",
                    );
                    binds.push(SqlValue::from(name.clone()));
                    binds.push(SqlValue::from(s.clone()));
                }
                ModelValue::Int(i) => {
                    subqueries.push("(cp.name = ? AND cp.value_int = ?)");
                    binds.push(SqlValue::from(name.clone()));
                    binds.push(SqlValue::from(*i));
                }
                ModelValue::Bool(b) => {
                    subqueries.push("(cp.name = ? AND cp.value_int = ?)");
                    binds.push(SqlValue::from(name.clone()));
                    binds.push(SqlValue::from(*b as i64));
                }
                ModelValue::Float(f) => {
                    subqueries.push("(cp.name = ? AND cp.value_float = ?)");
                    binds.push(SqlValue::from(name.clone()));
                    binds.push(SqlValue::from(*f));
                }
            }
        }
        sql.push_str(" AND (");
        sql.push_str(&subqueries.join(" OR "));
        sql.push(')');
    }

    sql.push_str(
        " GROUP BY ce.id HAVING COUNT(DISTINCT cp.name) = ?\
         ) AS matched \
         WHERE (SELECT COUNT(*) FROM cache_params WHERE cache_id = matched.id) = ?",
    );
    let n = params_set.len() as i64;
    binds.push(SqlValue::from(n));
    binds.push(SqlValue::from(n));

    conn.query_row(&sql, params_from_iter(binds), |row| row.get(0))
        .optional()
        .map_err(|e| ReplayError::Storage(format!("SQLite probe: {e}")))
}

fn probe_in(
    conn: &mut Connection,
    fingerprint: &Fingerprint,
) -> Result<Option<CacheEntry>, ReplayError> {
    let tx = conn
        .transaction()
        .map_err(|e| ReplayError::Storage(format!("SQLite transaction: {e}")))?;

    let id = match find_entry(&tx, fingerprint)? {
        Some(id) => id,
        None => return Ok(None),
    };

    let created_at: i64 = tx
        .query_row(
            "SELECT created_at FROM cache_entries WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .map_err(|e| ReplayError::Storage(format!("SQLite probe: {e}")))?;

    let now = now_millis();
    tx.execute(
        "UPDATE cache_entries SET accessed_at = ?1 WHERE id = ?2",
        params![now, id],
    )
    .map_err(|e| ReplayError::Storage(format!("SQLite touch: {e}")))?;

    let mut stmt = tx
        .prepare("SELECT response FROM cache_responses WHERE cache_id = ?1 ORDER BY seq")
        .map_err(|e| ReplayError::Storage(format!("SQLite prepare: {e}")))?;
    let rows = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))
        .map_err(|e| ReplayError::Storage(format!("SQLite query: {e}")))?;
    let mut responses = Vec::new();
    for row in rows {
        responses.push(row.map_err(|e| ReplayError::Storage(format!("SQLite row: {e}")))?);
    }
    drop(stmt);

    tx.commit()
        .map_err(|e| ReplayError::Storage(format!("SQLite commit: {e}")))?;

    Ok(Some(CacheEntry {
        id,
        responses,
        created_at,
        accessed_at: now,
    }))
}

fn insert_in(
    conn: &mut Connection,
    fingerprint: &Fingerprint,
    responses: &[String],
) -> Result<i64, ReplayError> {
    let now = now_millis();
    let tx = conn
        .transaction()
        .map_err(|e| ReplayError::Storage(format!("SQLite transaction: {e}")))?;

    match tx.execute(
        "INSERT INTO cache_entries (model_id, fingerprint, created_at, accessed_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![fingerprint.model_id(), fingerprint.digest(), now, now],
    ) {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(ReplayError::DuplicateEntry),
        Err(e) => return Err(ReplayError::Storage(format!("SQLite insert: {e}"))),
    }
    let cache_id = tx.last_insert_rowid();

    for (seq, response) in responses.iter().enumerate() {
        tx.execute(
            "INSERT INTO cache_responses (cache_id, seq, response) VALUES (?1, ?2, ?3)",
            params![cache_id, seq as i64, response],
        )
        .map_err(|e| ReplayError::Storage(format!("SQLite insert response: {e}")))?;
    }

    for (name, value) in fingerprint.params() {
        match value {
            ModelValue::Str(s) => {
                let string_id = intern_in(&tx, s)?;
                tx.execute(
                    "INSERT INTO cache_params (cache_id, name, value_string_id) \
                     VALUES (?1, ?2, ?3)",
                    params![cache_id, name, string_id],
                )
            }
            ModelValue::Int(i) => tx.execute(
                "INSERT INTO cache_params (cache_id, name, value_int) VALUES (?1, ?2, ?3)",
                params![cache_id, name, i],
            ),
            ModelValue::Bool(b) => tx.execute(
                "INSERT INTO cache_params (cache_id, name, value_int) VALUES (?1, ?2, ?3)",
                params![cache_id, name, *b as i64],
            ),
            ModelValue::Float(f) => tx.execute(
                "INSERT INTO cache_params (cache_id, name, value_float) VALUES (?1, ?2, ?3)",
                params![cache_id, name, f],
            ),
        }
        .map_err(|e| ReplayError::Storage(format!("SQLite insert param: {e}")))?;
    }

    tx.commit()
        .map_err(|e| ReplayError::Storage(format!("SQLite commit: {e}")))?;
    Ok(cache_id)
}

fn purge_in(conn: &Connection, filter: &PurgeFilter) -> Result<u64, ReplayError> {
    let mut conditions = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(model_id) = &filter.model_id {
        conditions.push("model_id = ?");
        binds.push(SqlValue::from(model_id.clone()));
    }
    if let Some(t) = filter.created_before {
        conditions.push("created_at < ?");
        binds.push(SqlValue::from(t));
    }
    if let Some(t) = filter.accessed_before {
        conditions.push("accessed_at < ?");
        binds.push(SqlValue::from(t));
    }

    // Parameter and response rows follow via ON DELETE CASCADE.
    let sql = format!(
        "DELETE FROM cache_entries WHERE {}",
        conditions.join(" AND ")
    );
    conn.execute(&sql, params_from_iter(binds))
        .map(|n| n as u64)
        .map_err(|e| ReplayError::Storage(format!("SQLite purge: {e}")))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
