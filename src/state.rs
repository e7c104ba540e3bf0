//! Persistence of the per-collection sync snapshot.
//!
//! A snapshot maps document id → [`SyncRecord`] and is always replaced as a
//! whole: [`SyncStateStore::commit`] either writes the new snapshot entirely
//! or leaves the old one in place.
//!
//! # Implementations
//!
//! - [`SqliteStateStore`]: `sync_records` table, one transaction per commit.
//! - [`InMemoryStateStore`]: for tests and dry runs.
//!
//! [`SyncGuards`] hands out the per-collection single-writer lock the
//! reconciler holds for a whole pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::OwnedMutexGuard;

use crate::error::SyncError;
use crate::models::{Snapshot, SyncRecord};

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Load the snapshot for `collection`. Unknown collections are empty.
    async fn load(&self, collection: &str) -> Result<Snapshot, SyncError>;

    /// Atomically replace the snapshot for `collection`.
    async fn commit(&self, collection: &str, snapshot: &Snapshot) -> Result<(), SyncError>;
}

/// Summary of a stored snapshot, for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct StateStats {
    pub records: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

// ============ SQLite ============

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = crate::db::connect(path).await?;
        crate::migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn stats(&self, collection: &str) -> Result<StateStats, SyncError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS records, MAX(synced_at) AS last_synced FROM sync_records WHERE collection = ?",
        )
        .bind(collection)
        .fetch_one(&self.pool)
        .await
        .map_err(state_err)?;

        let records: i64 = row.get("records");
        let last: Option<i64> = row.get("last_synced");
        Ok(StateStats {
            records,
            last_synced_at: last.and_then(DateTime::from_timestamp_micros),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn state_err(e: sqlx::Error) -> SyncError {
    SyncError::State(e.to_string())
}

fn from_micros(column: &str, value: i64) -> Result<DateTime<Utc>, SyncError> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| SyncError::State(format!("{} out of range: {}", column, value)))
}

#[async_trait]
impl SyncStateStore for SqliteStateStore {
    async fn load(&self, collection: &str) -> Result<Snapshot, SyncError> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, fingerprint, title, last_modified, version, synced_at
            FROM sync_records
            WHERE collection = ?
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(state_err)?;

        let mut snapshot = Snapshot::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("document_id");
            let record = SyncRecord {
                id: id.clone(),
                fingerprint: row.get("fingerprint"),
                title: row.get("title"),
                last_modified: from_micros("last_modified", row.get("last_modified"))?,
                version: row.get("version"),
                synced_at: from_micros("synced_at", row.get("synced_at"))?,
            };
            snapshot.insert(id, record);
        }
        Ok(snapshot)
    }

    async fn commit(&self, collection: &str, snapshot: &Snapshot) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await.map_err(state_err)?;

        sqlx::query("DELETE FROM sync_records WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await
            .map_err(state_err)?;

        for record in snapshot.values() {
            sqlx::query(
                r#"
                INSERT INTO sync_records
                    (collection, document_id, fingerprint, title, last_modified, version, synced_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(collection)
            .bind(&record.id)
            .bind(&record.fingerprint)
            .bind(&record.title)
            .bind(record.last_modified.timestamp_micros())
            .bind(record.version)
            .bind(record.synced_at.timestamp_micros())
            .execute(&mut *tx)
            .await
            .map_err(state_err)?;
        }

        tx.commit().await.map_err(state_err)?;
        Ok(())
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct InMemoryStateStore {
    snapshots: Mutex<HashMap<String, Snapshot>>,
    commits: AtomicUsize,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncStateStore for InMemoryStateStore {
    async fn load(&self, collection: &str) -> Result<Snapshot, SyncError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(snapshots.get(collection).cloned().unwrap_or_default())
    }

    async fn commit(&self, collection: &str, snapshot: &Snapshot) -> Result<(), SyncError> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.insert(collection.to_string(), snapshot.clone());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============ Single-writer guards ============

/// Per-collection async locks. Cloning shares the same lock table.
#[derive(Clone, Default)]
pub struct SyncGuards {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SyncGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide lock table.
    pub fn global() -> SyncGuards {
        static GLOBAL: OnceLock<SyncGuards> = OnceLock::new();
        GLOBAL.get_or_init(SyncGuards::new).clone()
    }

    /// Wait for exclusive access to `collection`.
    pub async fn lock(&self, collection: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(collection.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
