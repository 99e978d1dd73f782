//! SQLite-backed artifact cache.
//!
//! Blocking SQLite calls run on tokio's blocking pool so a slow disk never
//! stalls other in-flight renders.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{CURRENT_SCHEMA_VERSION, apply_schema, read_schema_version};
use super::{EvictionReport, TIMESTAMP_PREFIX, artifact_key, is_legacy_key, timestamp_key};
use crate::error::{RenderError, Result};
use crate::types::{ArtifactKind, DiagramKey};

/// Persistent artifact cache.
///
/// Cheap to clone; clones share one connection. Every write is a single
/// statement or transaction, so an entry is either fully present or absent.
#[derive(Clone)]
pub struct ArtifactCache {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache").finish_non_exhaustive()
    }
}

impl ArtifactCache {
    /// Open (or create) the cache database at `path`.
    ///
    /// Applies the schema and purges entries left by the legacy flat layout
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RenderError::StorageUnavailable(format!(
                    "cannot create {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] if SQLite cannot allocate it.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        apply_schema(&conn)?;
        let version = read_schema_version(&conn)?.unwrap_or(CURRENT_SCHEMA_VERSION);
        if version > CURRENT_SCHEMA_VERSION {
            return Err(RenderError::StorageUnavailable(format!(
                "cache schema v{version} is newer than supported v{CURRENT_SCHEMA_VERSION}"
            )));
        }
        let purged = purge_legacy(&conn)?;
        if purged > 0 {
            tracing::info!(purged, "removed legacy flat-layout cache entries");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Fetch an artifact.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] on storage failure.
    pub async fn get(&self, kind: ArtifactKind, key: &DiagramKey) -> Result<Option<String>> {
        let storage_key = artifact_key(kind, key);
        self.run(move |conn| get_text(conn, &storage_key)).await
    }

    /// Store an artifact, replacing any existing entry for `(kind, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] on storage failure.
    pub async fn put(&self, kind: ArtifactKind, key: &DiagramKey, payload: String) -> Result<()> {
        let storage_key = artifact_key(kind, key);
        self.run(move |conn| put_text(conn, &storage_key, &payload))
            .await
    }

    /// Record now as the last access time of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] on storage failure.
    pub async fn touch(&self, key: &DiagramKey) -> Result<()> {
        let key = key.clone();
        let now = now_millis();
        self.run(move |conn| touch_at(conn, &key, now)).await
    }

    /// Overwrite the last access time of `key` (epoch milliseconds).
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] on storage failure.
    pub async fn set_last_accessed(&self, key: &DiagramKey, at_millis: i64) -> Result<()> {
        let key = key.clone();
        self.run(move |conn| touch_at(conn, &key, at_millis)).await
    }

    /// Last access time of `key` in epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] on storage failure.
    pub async fn last_accessed(&self, key: &DiagramKey) -> Result<Option<i64>> {
        let storage_key = timestamp_key(key);
        self.run(move |conn| get_timestamp(conn, &storage_key)).await
    }

    /// Delete every diagram whose last access is older than `now - retention`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] on storage failure.
    pub async fn evict_older_than(&self, retention: Duration) -> Result<EvictionReport> {
        let now = now_millis();
        let report = self
            .run(move |conn| evict_at(conn, retention, now))
            .await?;
        tracing::info!(
            scanned = report.scanned,
            evicted = report.evicted,
            retention_days = retention.as_secs() / 86_400,
            "artifact cache eviction finished"
        );
        Ok(report)
    }

    /// Remove entries written by the legacy flat layout.
    ///
    /// [`open`](Self::open) already does this; exposed for maintenance tools.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] on storage failure.
    pub async fn purge_legacy_entries(&self) -> Result<usize> {
        self.run(purge_legacy).await
    }

    /// Delete everything. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::StorageUnavailable`] on storage failure.
    pub async fn clear(&self) -> Result<usize> {
        self.run(|conn| Ok(conn.execute("DELETE FROM artifacts", [])?))
            .await
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| RenderError::StorageUnavailable(format!("cache lock poisoned: {e}")))?;
            f(&guard)
        })
        .await
        .map_err(|e| RenderError::StorageUnavailable(format!("cache task failed: {e}")))?
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn get_text(conn: &Connection, storage_key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM artifacts WHERE key = ?1",
            params![storage_key],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

fn put_text(conn: &Connection, storage_key: &str, payload: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO artifacts (key, value) VALUES (?1, ?2)",
        params![storage_key, payload],
    )?;
    Ok(())
}

fn get_timestamp(conn: &Connection, storage_key: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT value FROM artifacts WHERE key = ?1",
            params![storage_key],
            |row| row.get::<_, i64>(0),
        )
        .optional()?)
}

fn touch_at(conn: &Connection, key: &DiagramKey, at_millis: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO artifacts (key, value) VALUES (?1, ?2)",
        params![timestamp_key(key), at_millis],
    )?;
    Ok(())
}

fn evict_at(conn: &Connection, retention: Duration, now_millis: i64) -> Result<EvictionReport> {
    let retention_millis = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    let cutoff = now_millis.saturating_sub(retention_millis);

    let stale: Vec<(String, i64)> = {
        let mut stmt = conn.prepare(
            "SELECT key, value FROM artifacts WHERE substr(key, 1, 3) = ?1",
        )?;
        let rows = stmt.query_map(params![TIMESTAMP_PREFIX], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut report = EvictionReport {
        scanned: stale.len(),
        evicted: 0,
    };
    for (ts_key, last_accessed) in stale {
        if last_accessed >= cutoff {
            continue;
        }
        let Some(encoded) = ts_key.strip_prefix(TIMESTAMP_PREFIX) else {
            continue;
        };
        let key = DiagramKey::from_encoded(encoded);
        delete_diagram(conn, &key)?;
        tracing::debug!(key = %key, last_accessed, "evicted cached diagram");
        report.evicted += 1;
    }
    Ok(report)
}

fn delete_diagram(conn: &Connection, key: &DiagramKey) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for kind in ArtifactKind::ALL {
        tx.execute(
            "DELETE FROM artifacts WHERE key = ?1",
            params![artifact_key(kind, key)],
        )?;
    }
    tx.execute(
        "DELETE FROM artifacts WHERE key = ?1",
        params![timestamp_key(key)],
    )?;
    tx.commit()?;
    Ok(())
}

fn purge_legacy(conn: &Connection) -> Result<usize> {
    let legacy: Vec<String> = {
        let mut stmt = conn.prepare("SELECT key FROM artifacts")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.filter_map(|r| match r {
            Ok(key) if is_legacy_key(&key) => Some(Ok(key)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .collect::<rusqlite::Result<_>>()?
    };

    if legacy.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    for key in &legacy {
        tx.execute("DELETE FROM artifacts WHERE key = ?1", params![key])?;
    }
    tx.commit()?;
    Ok(legacy.len())
}
