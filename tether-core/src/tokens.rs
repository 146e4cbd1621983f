// ABOUTME: Persistent per-room session token storage using SQLite
// ABOUTME: Record presence is the authoritative signal that a desk session is active for a room

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::desk::SessionTokens;

/// Who owns the inactivity timer for a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// The orchestrator arms its own tokio timer
    AppScheduled,
    /// The host platform schedules a one-shot job and calls back
    HostScheduled,
}

impl std::fmt::Display for TimerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AppScheduled => write!(f, "app_scheduled"),
            Self::HostScheduled => write!(f, "host_scheduled"),
        }
    }
}

impl std::str::FromStr for TimerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app_scheduled" => Ok(Self::AppScheduled),
            "host_scheduled" => Ok(Self::HostScheduled),
            _ => anyhow::bail!("Unknown timer mode: {}", s),
        }
    }
}

/// Read-only inactivity policy attached to a room's record at establishment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdleTimeoutConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_warning_secs")]
    pub warning_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_handler_mode")]
    pub handler_mode: TimerMode,
}

fn default_warning_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_handler_mode() -> TimerMode {
    TimerMode::AppScheduled
}

impl Default for IdleTimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            warning_secs: default_warning_secs(),
            timeout_secs: default_timeout_secs(),
            handler_mode: default_handler_mode(),
        }
    }
}

/// Persisted arm state of a room's inactivity timer.
///
/// The in-memory cancellation handle lives in the idle timeout manager; this
/// only records whether a timer is armed and its job id, so a restart or a
/// host-scheduled job can be reconciled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerHandle {
    pub scheduled: bool,
    pub job_id: Option<String>,
}

/// The per-room aggregate persisted for an active desk session.
///
/// Created when the chat is established, deleted on any terminal transition.
/// Consumers must re-read it rather than caching: an external actor (visitor
/// closing the chat, a host-scheduled timeout job) can delete it concurrently,
/// and absence is how the poll loop learns to stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSessionRecord {
    pub room_id: String,
    pub tokens: SessionTokens,
    pub idle: IdleTimeoutConfig,
    pub timer: TimerHandle,
    pub sneak_peek_enabled: bool,
    pub created_at: String,
}

#[derive(Clone)]
pub struct TokenStore {
    db: Arc<Mutex<Connection>>,
}

impl TokenStore {
    pub fn new<P: AsRef<Path>>(workspace_path: P) -> Result<Self> {
        let workspace_path = workspace_path.as_ref();
        std::fs::create_dir_all(workspace_path).context("Failed to create workspace directory")?;

        let db_path = workspace_path.join("sessions.db");
        let conn = Connection::open(&db_path).context("Failed to open SQLite database")?;
        Self::init_schema(&conn)?;

        tracing::info!(db = %db_path.display(), "Token store initialized");

        Ok(TokenStore {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(TokenStore {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS room_sessions (
                room_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                affinity_token TEXT NOT NULL,
                session_key TEXT NOT NULL,
                idle_enabled INTEGER NOT NULL DEFAULT 0,
                idle_warning_secs INTEGER NOT NULL,
                idle_timeout_secs INTEGER NOT NULL,
                idle_handler_mode TEXT NOT NULL,
                timer_scheduled INTEGER NOT NULL DEFAULT 0,
                timer_job_id TEXT,
                sneak_peek_enabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<RoomSessionRecord> {
        let handler_mode: String = row.get(7)?;
        let handler_mode = handler_mode.parse().map_err(|e: anyhow::Error| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(RoomSessionRecord {
            room_id: row.get(0)?,
            tokens: SessionTokens {
                session_id: row.get(1)?,
                affinity_token: row.get(2)?,
                session_key: row.get(3)?,
            },
            idle: IdleTimeoutConfig {
                enabled: row.get::<_, i32>(4)? != 0,
                warning_secs: row.get::<_, i64>(5)? as u64,
                timeout_secs: row.get::<_, i64>(6)? as u64,
                handler_mode,
            },
            timer: TimerHandle {
                scheduled: row.get::<_, i32>(8)? != 0,
                job_id: row.get(9)?,
            },
            sneak_peek_enabled: row.get::<_, i32>(10)? != 0,
            created_at: row.get(11)?,
        })
    }

    const SELECT_COLUMNS: &'static str = "room_id, session_id, affinity_token, session_key, \
         idle_enabled, idle_warning_secs, idle_timeout_secs, idle_handler_mode, \
         timer_scheduled, timer_job_id, sneak_peek_enabled, created_at";

    /// Get the record for a room, if one exists.
    pub fn get(&self, room_id: &str) -> Result<Option<RoomSessionRecord>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM room_sessions WHERE room_id = ?1",
            Self::SELECT_COLUMNS
        ))?;

        match stmt.query_row(params![room_id], Self::row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert a record for a room. Fails if the room already has one:
    /// a room owns at most one live session.
    pub fn insert(&self, record: &RoomSessionRecord) -> Result<()> {
        let db = self.lock()?;
        match db.execute(
            "INSERT INTO room_sessions (room_id, session_id, affinity_token, session_key,
                idle_enabled, idle_warning_secs, idle_timeout_secs, idle_handler_mode,
                timer_scheduled, timer_job_id, sneak_peek_enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &record.room_id,
                &record.tokens.session_id,
                &record.tokens.affinity_token,
                &record.tokens.session_key,
                if record.idle.enabled { 1 } else { 0 },
                record.idle.warning_secs as i64,
                record.idle.timeout_secs as i64,
                record.idle.handler_mode.to_string(),
                if record.timer.scheduled { 1 } else { 0 },
                &record.timer.job_id,
                if record.sneak_peek_enabled { 1 } else { 0 },
                &record.created_at,
            ],
        ) {
            Ok(_) => {
                tracing::info!(
                    room_id = %record.room_id,
                    session_id = %record.tokens.session_id,
                    "Session record persisted"
                );
                Ok(())
            }
            Err(e) => {
                if let rusqlite::Error::SqliteFailure(sqlite_err, _) = &e {
                    if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation {
                        anyhow::bail!("Room {} already has a live session", record.room_id);
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Delete the record for a room. Returns whether a record existed.
    ///
    /// Tolerant of concurrent deletion: deleting an already-absent record is
    /// not an error, because the visitor-close path and the poll loop can race.
    pub fn delete(&self, room_id: &str) -> Result<bool> {
        let db = self.lock()?;
        let deleted = db.execute(
            "DELETE FROM room_sessions WHERE room_id = ?1",
            params![room_id],
        )?;
        if deleted > 0 {
            tracing::info!(room_id = %room_id, "Session record deleted");
        }
        Ok(deleted > 0)
    }

    /// Update the persisted timer arm state for a room.
    pub fn update_timer(&self, room_id: &str, timer: &TimerHandle) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            "UPDATE room_sessions SET timer_scheduled = ?1, timer_job_id = ?2 WHERE room_id = ?3",
            params![
                if timer.scheduled { 1 } else { 0 },
                &timer.job_id,
                room_id
            ],
        )?;
        Ok(())
    }

    /// List all live session records (used for the active-session gauge and
    /// startup reconciliation).
    pub fn list_all(&self) -> Result<Vec<RoomSessionRecord>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM room_sessions ORDER BY created_at ASC",
            Self::SELECT_COLUMNS
        ))?;

        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(room_id: &str) -> RoomSessionRecord {
        RoomSessionRecord {
            room_id: room_id.to_string(),
            tokens: SessionTokens {
                session_id: "sid-1".to_string(),
                affinity_token: "aff-1".to_string(),
                session_key: "key-1".to_string(),
            },
            idle: IdleTimeoutConfig {
                enabled: true,
                warning_secs: 30,
                timeout_secs: 120,
                handler_mode: TimerMode::AppScheduled,
            },
            timer: TimerHandle::default(),
            sneak_peek_enabled: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn absent_record_means_no_session() {
        let store = TokenStore::in_memory().unwrap();
        assert!(store.get("room-a").unwrap().is_none());
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let store = TokenStore::in_memory().unwrap();
        store.insert(&sample_record("room-a")).unwrap();

        let record = store.get("room-a").unwrap().expect("record should exist");
        assert_eq!(record.tokens.session_id, "sid-1");
        assert_eq!(record.idle.handler_mode, TimerMode::AppScheduled);
        assert!(!record.timer.scheduled);

        assert!(store.delete("room-a").unwrap());
        assert!(store.get("room-a").unwrap().is_none());
        // Second delete is a no-op, not an error
        assert!(!store.delete("room-a").unwrap());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = TokenStore::in_memory().unwrap();
        store.insert(&sample_record("room-a")).unwrap();
        let err = store.insert(&sample_record("room-a")).unwrap_err();
        assert!(err.to_string().contains("already has a live session"));
    }

    #[test]
    fn timer_state_persists() {
        let store = TokenStore::in_memory().unwrap();
        store.insert(&sample_record("room-a")).unwrap();

        let timer = TimerHandle {
            scheduled: true,
            job_id: Some("job-7".to_string()),
        };
        store.update_timer("room-a", &timer).unwrap();

        let record = store.get("room-a").unwrap().unwrap();
        assert_eq!(record.timer, timer);

        store.update_timer("room-a", &TimerHandle::default()).unwrap();
        let record = store.get("room-a").unwrap().unwrap();
        assert!(!record.timer.scheduled);
        assert!(record.timer.job_id.is_none());
    }

    #[test]
    fn persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TokenStore::new(dir.path()).unwrap();
            store.insert(&sample_record("room-disk")).unwrap();
        }
        let store = TokenStore::new(dir.path()).unwrap();
        assert!(store.get("room-disk").unwrap().is_some());
    }
}
