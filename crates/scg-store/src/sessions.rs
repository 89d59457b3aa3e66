use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use scg_core::{SessionId, SessionStatus};

use crate::database::Database;
use crate::error::StoreError;

/// A session row as stored durably.
#[derive(Clone, Debug, Serialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new session with status `created`.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn insert(&self, id: &SessionId, created_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, created_at, status) VALUES (?1, ?2, 'created')",
                rusqlite::params![id.as_str(), created_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Update a session's status. Returns the number of rows affected;
    /// zero means no such session exists durably.
    #[instrument(skip(self), fields(session_id = %id, status = %status))]
    pub fn update_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
    ) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE sessions SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.to_string(), id.as_str()],
            )?;
            Ok(n)
        })
    }

    /// Fetch a session row.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRecord, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, created_at, status FROM sessions WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_record(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    pub fn exists(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM sessions WHERE id = ?1")?;
            Ok(stmt.exists([id.as_str()])?)
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<SessionRecord, StoreError> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(1)?;
    let status: String = row.get(2)?;

    Ok(SessionRecord {
        id: SessionId::from_raw(id),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Database(format!("bad created_at: {e}")))?
            .with_timezone(&Utc),
        status: status
            .parse()
            .map_err(|e| StoreError::Database(format!("bad status: {e}")))?,
    })
}
