use chrono::{DateTime, Utc};
use dashmap::DashMap;

use scg_core::{Sample, SessionId, SessionStatus};

/// In-memory state of one live session: lifecycle status plus the sample
/// buffer awaiting flush. Connection membership lives in [`crate::client`].
#[derive(Debug)]
pub struct SessionEntry {
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub buffer: Vec<Sample>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("duplicate session id: {0}")]
    DuplicateSession(SessionId),
}

/// Process-wide map from session id to session state. All buffer mutations
/// go through here; dashmap's per-shard locking gives the required
/// session-granularity mutual exclusion, and `drain_and_end` is a single
/// `remove` so no append can interleave between read and clear.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session with an empty buffer. Id collisions are
    /// unreachable with generated ids but checked anyway.
    pub fn create(
        &self,
        id: &SessionId,
        created_at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        match self.sessions.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RegistryError::DuplicateSession(id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(SessionEntry {
                    status: SessionStatus::Created,
                    created_at,
                    buffer: Vec::new(),
                });
                Ok(())
            }
        }
    }

    /// Append a batch to the session buffer. Returns the new buffer length.
    pub fn append_samples(
        &self,
        id: &SessionId,
        samples: Vec<Sample>,
    ) -> Result<usize, RegistryError> {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                entry.buffer.extend(samples);
                Ok(entry.buffer.len())
            }
            None => Err(RegistryError::SessionNotFound(id.clone())),
        }
    }

    /// Copy of the current buffer, for the historical batch on join.
    /// `None` for sessions unknown to the registry (join is best-effort).
    pub fn snapshot(&self, id: &SessionId) -> Option<Vec<Sample>> {
        self.sessions.get(id).map(|entry| entry.buffer.clone())
    }

    /// Atomically end the session: the entry is removed and its buffer
    /// handed to the caller exactly once. A second call observes an absent
    /// entry and fails.
    pub fn drain_and_end(&self, id: &SessionId) -> Result<Vec<Sample>, RegistryError> {
        match self.sessions.remove(id) {
            Some((_, entry)) => Ok(entry.buffer),
            None => Err(RegistryError::SessionNotFound(id.clone())),
        }
    }

    /// Drop a session without draining. Rollback path for create-time
    /// storage failures.
    pub fn remove(&self, id: &SessionId) {
        self.sessions.remove(id);
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn buffered_len(&self, id: &SessionId) -> Option<usize> {
        self.sessions.get(id).map(|entry| entry.buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(t: f64) -> Sample {
        Sample {
            t,
            ax: 0.0,
            ay: 0.0,
            az: 1.0,
        }
    }

    #[test]
    fn create_then_duplicate_rejected() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.create(&id, Utc::now()).unwrap();

        let err = registry.create(&id, Utc::now()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateSession(id));
    }

    #[test]
    fn append_then_drain_is_exactly_once() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.create(&id, Utc::now()).unwrap();

        registry.append_samples(&id, vec![s(1.0), s(2.0)]).unwrap();
        registry.append_samples(&id, vec![s(3.0)]).unwrap();
        assert_eq!(registry.buffered_len(&id), Some(3));

        let drained = registry.drain_and_end(&id).unwrap();
        let ts: Vec<f64> = drained.iter().map(|x| x.t).collect();
        assert_eq!(ts, vec![1.0, 2.0, 3.0]);

        // Entry is gone: buffer cannot be read or drained again.
        assert_eq!(registry.buffered_len(&id), None);
        assert_eq!(
            registry.drain_and_end(&id).unwrap_err(),
            RegistryError::SessionNotFound(id)
        );
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        assert_eq!(
            registry.append_samples(&id, vec![s(1.0)]).unwrap_err(),
            RegistryError::SessionNotFound(id)
        );
    }

    #[test]
    fn snapshot_copies_without_draining() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.create(&id, Utc::now()).unwrap();
        registry.append_samples(&id, vec![s(1.0)]).unwrap();

        let snap = registry.snapshot(&id).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(registry.buffered_len(&id), Some(1));

        assert!(registry.snapshot(&SessionId::new()).is_none());
    }

    #[test]
    fn append_after_drain_fails() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.create(&id, Utc::now()).unwrap();
        registry.drain_and_end(&id).unwrap();

        assert!(registry.append_samples(&id, vec![s(1.0)]).is_err());
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        use std::sync::Arc;

        let registry = Arc::new(SessionRegistry::new());
        let id = SessionId::new();
        registry.create(&id, Utc::now()).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    registry.append_samples(&id, vec![s(i as f64)]).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let drained = registry.drain_and_end(&id).unwrap();
        assert_eq!(drained.len(), 800);
    }
}
