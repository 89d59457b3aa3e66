use tracing::instrument;

use scg_core::{Sample, SessionId};

use crate::database::Database;
use crate::error::StoreError;

/// Bulk access to the raw-sample table. Samples are owned by a session and
/// cascade away with it.
pub struct SampleRepo {
    db: Database,
}

impl SampleRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write a drained session buffer in a single transaction.
    #[instrument(skip(self, samples), fields(session_id = %session_id, count = samples.len()))]
    pub fn insert_batch(
        &self,
        session_id: &SessionId,
        samples: &[Sample],
    ) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO scg_raw_data (session_id, t, ax, ay, az)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for s in samples {
                    stmt.execute(rusqlite::params![
                        session_id.as_str(),
                        s.t,
                        s.ax,
                        s.ay,
                        s.az
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Fetch all samples for a session, ordered by timestamp.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn fetch(&self, session_id: &SessionId) -> Result<Vec<Sample>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t, ax, ay, az FROM scg_raw_data WHERE session_id = ?1 ORDER BY t",
            )?;
            let rows = stmt.query_map([session_id.as_str()], |row| {
                Ok(Sample {
                    t: row.get(0)?,
                    ax: row.get(1)?,
                    ay: row.get(2)?,
                    az: row.get(3)?,
                })
            })?;
            let mut samples = Vec::new();
            for row in rows {
                samples.push(row?);
            }
            Ok(samples)
        })
    }
}
