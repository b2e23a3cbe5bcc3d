//! Learning Pattern Store.
//!
//! A key-addressed SQLite store for the success/failure/correction patterns
//! that [`shard-base`'s `LearningTracker`](../shard_base/learning) persists
//! once its in-memory count for a `(shard_id, kind, key)` triple crosses its
//! threshold.
//!
//! # Storage layout
//!
//! A single table `learned_patterns` is created (if it does not already
//! exist):
//!
//! | column      | type | description                                    |
//! |-------------|------|-------------------------------------------------|
//! | id          | TEXT | UUID v4 primary key                            |
//! | shard_id    | TEXT | Owning shard's identifier                       |
//! | predicate   | TEXT | Fact predicate this pattern is keyed on         |
//! | args        | TEXT | JSON-encoded `Vec<FactValue>`                   |
//! | source      | TEXT | Provenance label (e.g. `"autopoiesis"`)         |
//! | confidence  | REAL | Current confidence in `[0.0, 1.0]`              |
//! | created_at  | TEXT | RFC-3339 creation timestamp (UTC)               |
//! | updated_at  | TEXT | RFC-3339 last-update timestamp (UTC)            |
//!
//! `(shard_id, predicate, args)` is unique; a repeated [`LearningStore::save`]
//! for the same key replaces the existing row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use shard_types::FactValue;
use uuid::Uuid;

use std::sync::{Arc, Mutex};

use crate::error::MemoryError;

/// A persisted learning pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub shard_id: String,
    pub predicate: String,
    pub args: Vec<FactValue>,
    pub source: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence boundary for learning patterns. [`SqliteLearningStore`] is the
/// only implementation shipped here; callers needing an in-memory double for
/// tests can implement this trait directly.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn save(
        &self,
        shard_id: &str,
        predicate: &str,
        args: &[FactValue],
        source: &str,
        confidence: f64,
    ) -> Result<(), MemoryError>;

    async fn load(&self, shard_id: &str) -> Result<Vec<LearningRecord>, MemoryError>;

    async fn load_by_predicate(
        &self,
        shard_id: &str,
        predicate: &str,
    ) -> Result<Vec<LearningRecord>, MemoryError>;

    /// Multiplies every pattern's confidence for `shard_id` by `factor`.
    async fn decay_confidence(&self, shard_id: &str, factor: f64) -> Result<(), MemoryError>;
}

/// SQLite-backed [`LearningStore`].
#[derive(Clone)]
pub struct SqliteLearningStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLearningStore {
    pub fn open(path: &str) -> Result<Self, MemoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn: Arc::new(Mutex::new(conn)) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Arc::new(Mutex::new(conn)) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), MemoryError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS learned_patterns (
                id          TEXT NOT NULL PRIMARY KEY,
                shard_id    TEXT NOT NULL,
                predicate   TEXT NOT NULL,
                args        TEXT NOT NULL,
                source      TEXT NOT NULL,
                confidence  REAL NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                UNIQUE(shard_id, predicate, args)
            );",
        )?;
        Ok(())
    }
}

#[async_trait]
impl LearningStore for SqliteLearningStore {
    async fn save(
        &self,
        shard_id: &str,
        predicate: &str,
        args: &[FactValue],
        source: &str,
        confidence: f64,
    ) -> Result<(), MemoryError> {
        let conn = Arc::clone(&self.conn);
        let shard_id = shard_id.to_owned();
        let predicate = predicate.to_owned();
        let args_json = serde_json::to_string(args)?;
        let source = source.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let now = Utc::now().to_rfc3339();
            let existing_id: Option<String> = conn
                .query_row(
                    "SELECT id FROM learned_patterns WHERE shard_id = ?1 AND predicate = ?2 AND args = ?3",
                    params![shard_id, predicate, args_json],
                    |row| row.get(0),
                )
                .ok();
            let id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            conn.execute(
                "INSERT INTO learned_patterns (id, shard_id, predicate, args, source, confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(shard_id, predicate, args) DO UPDATE SET
                     source = excluded.source,
                     confidence = excluded.confidence,
                     updated_at = excluded.updated_at",
                params![id, shard_id, predicate, args_json, source, confidence, now],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    async fn load(&self, shard_id: &str) -> Result<Vec<LearningRecord>, MemoryError> {
        let conn = Arc::clone(&self.conn);
        let shard_id = shard_id.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare(
                "SELECT shard_id, predicate, args, source, confidence, created_at, updated_at
                 FROM learned_patterns WHERE shard_id = ?1 ORDER BY updated_at ASC",
            )?;
            let rows = stmt.query_map(params![shard_id], row_to_record)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::Sqlite)
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    async fn load_by_predicate(
        &self,
        shard_id: &str,
        predicate: &str,
    ) -> Result<Vec<LearningRecord>, MemoryError> {
        let conn = Arc::clone(&self.conn);
        let shard_id = shard_id.to_owned();
        let predicate = predicate.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare(
                "SELECT shard_id, predicate, args, source, confidence, created_at, updated_at
                 FROM learned_patterns WHERE shard_id = ?1 AND predicate = ?2 ORDER BY updated_at ASC",
            )?;
            let rows = stmt.query_map(params![shard_id, predicate], row_to_record)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::Sqlite)
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    async fn decay_confidence(&self, shard_id: &str, factor: f64) -> Result<(), MemoryError> {
        let conn = Arc::clone(&self.conn);
        let shard_id = shard_id.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE learned_patterns SET confidence = confidence * ?1, updated_at = ?2 WHERE shard_id = ?3",
                params![factor, now, shard_id],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LearningRecord> {
    let shard_id: String = row.get(0)?;
    let predicate: String = row.get(1)?;
    let args_json: String = row.get(2)?;
    let source: String = row.get(3)?;
    let confidence: f64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    let args: Vec<FactValue> = serde_json::from_str(&args_json).map_err(|e| {
        rusqlite::Error::InvalidColumnType(2, e.to_string(), rusqlite::types::Type::Text)
    })?;
    let created_at = created_at.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::InvalidColumnType(5, e.to_string(), rusqlite::types::Type::Text)
    })?;
    let updated_at = updated_at.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::InvalidColumnType(6, e.to_string(), rusqlite::types::Type::Text)
    })?;
    Ok(LearningRecord {
        shard_id,
        predicate,
        args,
        source,
        confidence,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_roundtrips() {
        let store = SqliteLearningStore::open_in_memory().unwrap();
        store
            .save("perception-1", "verb_success", &[FactValue::Atom(shard_types::Atom::new("move"))], "perception", 0.9)
            .await
            .unwrap();
        let loaded = store.load("perception-1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].predicate, "verb_success");
        assert!((loaded[0].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn save_same_key_replaces_existing_row() {
        let store = SqliteLearningStore::open_in_memory().unwrap();
        let args = [FactValue::Str("k".to_string())];
        store.save("s1", "pred", &args, "src", 0.5).await.unwrap();
        store.save("s1", "pred", &args, "src", 0.8).await.unwrap();
        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!((loaded[0].confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn load_by_predicate_filters() {
        let store = SqliteLearningStore::open_in_memory().unwrap();
        store.save("s1", "a", &[], "src", 0.5).await.unwrap();
        store.save("s1", "b", &[], "src", 0.5).await.unwrap();
        let loaded = store.load_by_predicate("s1", "a").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].predicate, "a");
    }

    #[tokio::test]
    async fn decay_confidence_scales_all_rows_for_shard() {
        let store = SqliteLearningStore::open_in_memory().unwrap();
        store.save("s1", "a", &[], "src", 1.0).await.unwrap();
        store.decay_confidence("s1", 0.5).await.unwrap();
        let loaded = store.load("s1").await.unwrap();
        assert!((loaded[0].confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn patterns_are_scoped_per_shard() {
        let store = SqliteLearningStore::open_in_memory().unwrap();
        store.save("s1", "a", &[], "src", 1.0).await.unwrap();
        store.save("s2", "a", &[], "src", 1.0).await.unwrap();
        store.decay_confidence("s1", 0.1).await.unwrap();
        let s2 = store.load("s2").await.unwrap();
        assert!((s2[0].confidence - 1.0).abs() < 1e-9);
    }
}
