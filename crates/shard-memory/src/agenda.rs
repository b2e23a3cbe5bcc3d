//! Agenda Store.
//!
//! Backs Planner's goal decomposition: a shared queue of [`AgendaItem`]s
//! claimed and completed by the runtime, with a bounded retry budget before
//! an item escalates.
//!
//! # Storage layout
//!
//! A single SQLite table `agenda_items` is created (if it does not already
//! exist):
//!
//! | column      | type | description                                        |
//! |-------------|------|-----------------------------------------------------|
//! | id          | TEXT | UUID v4 primary key                                |
//! | goal        | TEXT | The parent goal this item decomposes                |
//! | description | TEXT | Full task description                               |
//! | status      | TEXT | `"pending"`, `"claimed"`, `"completed"`, `"blocked"` |
//! | claimed_by  | TEXT | Owning shard id (NULL when unclaimed)               |
//! | retries     | INTEGER | Number of retry attempts recorded so far          |
//! | created_at  | TEXT | RFC-3339 creation timestamp (UTC)                   |
//! | updated_at  | TEXT | RFC-3339 last-update timestamp (UTC)                |

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::{Arc, Mutex};

use crate::error::MemoryError;

/// The lifecycle state of an agenda item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgendaStatus {
    Pending,
    Claimed,
    Completed,
    Blocked,
}

impl AgendaStatus {
    fn as_str(&self) -> &'static str {
        match self {
            AgendaStatus::Pending => "pending",
            AgendaStatus::Claimed => "claimed",
            AgendaStatus::Completed => "completed",
            AgendaStatus::Blocked => "blocked",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AgendaStatus::Pending),
            "claimed" => Some(AgendaStatus::Claimed),
            "completed" => Some(AgendaStatus::Completed),
            "blocked" => Some(AgendaStatus::Blocked),
            _ => None,
        }
    }
}

/// A single item on the shared agenda.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: String,
    pub goal: String,
    pub description: String,
    pub status: AgendaStatus,
    pub claimed_by: Option<String>,
    pub retries: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// SQLite-backed agenda for Planner's goal decomposition.
#[derive(Clone)]
pub struct AgendaStore {
    conn: Arc<Mutex<Connection>>,
    max_retries_per_task: u32,
}

impl AgendaStore {
    pub fn open(path: &str, max_retries_per_task: u32) -> Result<Self, MemoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn: Arc::new(Mutex::new(conn)), max_retries_per_task };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory(max_retries_per_task: u32) -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Arc::new(Mutex::new(conn)), max_retries_per_task };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), MemoryError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agenda_items (
                id          TEXT NOT NULL PRIMARY KEY,
                goal        TEXT NOT NULL,
                description TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'pending',
                claimed_by  TEXT,
                retries     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Decompose `goal` into a new pending item and return its id.
    pub async fn post(&self, goal: &str, description: &str) -> Result<String, MemoryError> {
        let conn = Arc::clone(&self.conn);
        let goal = goal.to_owned();
        let description = description.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let id = Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO agenda_items (id, goal, description, status, claimed_by, retries, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', NULL, 0, ?4, ?4)",
                params![id, goal, description, now],
            )?;
            Ok(id)
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    pub async fn claim(&self, item_id: &str, shard_id: &str) -> Result<(), MemoryError> {
        let conn = Arc::clone(&self.conn);
        let item_id = item_id.to_owned();
        let shard_id = shard_id.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let item = get_item(&conn, &item_id)?;
            match item.status {
                AgendaStatus::Claimed => return Err(MemoryError::AlreadyClaimed),
                AgendaStatus::Completed => return Err(MemoryError::AlreadyCompleted),
                AgendaStatus::Pending | AgendaStatus::Blocked => {}
            }
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE agenda_items SET status = 'claimed', claimed_by = ?1, updated_at = ?2 WHERE id = ?3",
                params![shard_id, now, item_id],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    pub async fn complete(&self, item_id: &str, shard_id: &str) -> Result<(), MemoryError> {
        let conn = Arc::clone(&self.conn);
        let item_id = item_id.to_owned();
        let shard_id = shard_id.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let item = get_item(&conn, &item_id)?;
            if item.status == AgendaStatus::Completed {
                return Err(MemoryError::AlreadyCompleted);
            }
            if item.claimed_by.as_deref() != Some(&shard_id) {
                return Err(MemoryError::NotClaimedBy(shard_id));
            }
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE agenda_items SET status = 'completed', updated_at = ?1 WHERE id = ?2",
                params![now, item_id],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    /// Record a retry attempt. Once `retries` exceeds `MaxRetriesPerTask` the
    /// item transitions to [`AgendaStatus::Blocked`] instead of returning to
    /// `pending`, escalating it out of the automatic retry path.
    pub async fn retry_or_block(&self, item_id: &str) -> Result<AgendaStatus, MemoryError> {
        let conn = Arc::clone(&self.conn);
        let item_id = item_id.to_owned();
        let max_retries = self.max_retries_per_task;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let item = get_item(&conn, &item_id)?;
            let retries = item.retries + 1;
            let now = Utc::now().to_rfc3339();
            let status = if retries > max_retries { AgendaStatus::Blocked } else { AgendaStatus::Pending };
            conn.execute(
                "UPDATE agenda_items SET status = ?1, claimed_by = NULL, retries = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), retries, now, item_id],
            )?;
            Ok(status)
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    pub async fn get(&self, item_id: &str) -> Result<AgendaItem, MemoryError> {
        let conn = Arc::clone(&self.conn);
        let item_id = item_id.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            get_item(&conn, &item_id)
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    pub async fn list_pending(&self) -> Result<Vec<AgendaItem>, MemoryError> {
        self.list_by_status(AgendaStatus::Pending.as_str()).await
    }

    pub async fn list_all(&self) -> Result<Vec<AgendaItem>, MemoryError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare(
                "SELECT id, goal, description, status, claimed_by, retries, created_at, updated_at
                 FROM agenda_items ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_item)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::Sqlite)
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }

    async fn list_by_status(&self, status: &str) -> Result<Vec<AgendaItem>, MemoryError> {
        let conn = Arc::clone(&self.conn);
        let status = status.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare(
                "SELECT id, goal, description, status, claimed_by, retries, created_at, updated_at
                 FROM agenda_items WHERE status = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![status], row_to_item)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::Sqlite)
        })
        .await
        .map_err(|e| MemoryError::TaskPanic(e.to_string()))?
    }
}

fn get_item(conn: &Connection, item_id: &str) -> Result<AgendaItem, MemoryError> {
    let mut stmt = conn.prepare(
        "SELECT id, goal, description, status, claimed_by, retries, created_at, updated_at
         FROM agenda_items WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![item_id], row_to_item)?;
    rows.next()
        .ok_or_else(|| MemoryError::NotFound(item_id.to_string()))?
        .map_err(MemoryError::Sqlite)
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgendaItem> {
    let id: String = row.get(0)?;
    let goal: String = row.get(1)?;
    let description: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let claimed_by: Option<String> = row.get(4)?;
    let retries: u32 = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let status = AgendaStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, status_str, rusqlite::types::Type::Text)
    })?;
    Ok(AgendaItem { id, goal, description, status, claimed_by, retries, created_at, updated_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> AgendaStore {
        AgendaStore::open_in_memory(2).unwrap()
    }

    #[tokio::test]
    async fn post_creates_pending_item() {
        let store = make_store();
        let id = store.post("ship release", "write changelog").await.unwrap();
        let item = store.get(&id).await.unwrap();
        assert_eq!(item.status, AgendaStatus::Pending);
        assert!(item.claimed_by.is_none());
    }

    #[tokio::test]
    async fn claim_then_complete_succeeds() {
        let store = make_store();
        let id = store.post("goal", "desc").await.unwrap();
        store.claim(&id, "planner-1").await.unwrap();
        store.complete(&id, "planner-1").await.unwrap();
        let item = store.get(&id).await.unwrap();
        assert_eq!(item.status, AgendaStatus::Completed);
    }

    #[tokio::test]
    async fn complete_by_non_claimer_rejected() {
        let store = make_store();
        let id = store.post("goal", "desc").await.unwrap();
        store.claim(&id, "planner-1").await.unwrap();
        let err = store.complete(&id, "planner-2").await.unwrap_err();
        assert!(matches!(err, MemoryError::NotClaimedBy(_)));
    }

    #[tokio::test]
    async fn retries_below_max_return_to_pending() {
        let store = make_store();
        let id = store.post("goal", "desc").await.unwrap();
        store.claim(&id, "p1").await.unwrap();
        let status = store.retry_or_block(&id).await.unwrap();
        assert_eq!(status, AgendaStatus::Pending);
    }

    #[tokio::test]
    async fn retries_beyond_max_escalate_to_blocked() {
        let store = make_store();
        let id = store.post("goal", "desc").await.unwrap();
        store.claim(&id, "p1").await.unwrap();
        store.retry_or_block(&id).await.unwrap();
        store.claim(&id, "p1").await.unwrap();
        store.retry_or_block(&id).await.unwrap();
        store.claim(&id, "p1").await.unwrap();
        let status = store.retry_or_block(&id).await.unwrap();
        assert_eq!(status, AgendaStatus::Blocked);
    }

    #[tokio::test]
    async fn list_pending_excludes_claimed() {
        let store = make_store();
        let id1 = store.post("g1", "d1").await.unwrap();
        let id2 = store.post("g2", "d2").await.unwrap();
        store.claim(&id2, "p1").await.unwrap();
        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id1);
    }
}
