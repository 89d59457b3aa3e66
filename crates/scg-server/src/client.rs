use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use scg_core::SessionId;

pub use scg_core::ClientId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// A connected streaming client (patient or viewer). Bound to exactly one
/// session for its lifetime.
pub struct Client {
    pub id: ClientId,
    pub session_id: SessionId,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, session_id: SessionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            session_id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients, keyed by client id, with
/// session-scoped fan-out.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client under a session and return its id + the
    /// receiving half of its outbound queue.
    pub fn register(&self, session_id: SessionId) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Client::new(id.clone(), session_id, tx));
        self.clients.insert(id.clone(), client);
        (id, rx)
    }

    /// Remove a client by id. Idempotent.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn session_of(&self, id: &ClientId) -> Option<SessionId> {
        self.clients.get(id).map(|c| c.session_id.clone())
    }

    /// Send a message to a specific client. Drops the message if the queue
    /// is full so one stalled receiver cannot stall anyone else.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        if let Some(client) = self.clients.get(client_id) {
            match client.tx.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    tracing::warn!(
                        client_id = %client_id,
                        msg_len = msg.len(),
                        "send queue full, dropping message"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        } else {
            false
        }
    }

    /// Fan out a message to every connected client of a session except
    /// `exclude` (the originator). Per-client delivery failures are dropped.
    pub fn broadcast_to_session(
        &self,
        session_id: &SessionId,
        message: &str,
        exclude: Option<&ClientId>,
    ) {
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.session_id != *session_id || !client.is_connected() {
                continue;
            }
            if exclude == Some(&client.id) {
                continue;
            }
            if client.tx.try_send(message.to_string()).is_err() {
                tracing::debug!(client_id = %client.id, "broadcast delivery dropped");
            }
        }
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// All client ids currently in a session.
    pub fn clients_for_session(&self, session_id: &SessionId) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|entry| entry.value().session_id == *session_id)
            .map(|entry| entry.value().id.clone())
            .collect()
    }

    /// Remove clients that haven't responded to pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.value().id.clone())
            .collect();

        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        removed
    }

    fn mark_disconnected(&self, id: &ClientId) {
        if let Some(client) = self.clients.get(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    fn record_pong(&self, id: &ClientId) {
        if let Some(client) = self.clients.get(id) {
            client.record_pong();
        }
    }
}

/// Drive one WebSocket connection: split into reader/writer tasks, forward
/// inbound frames to the relay, keep liveness with ping/pong. Runs until the
/// peer disconnects, then unregisters the client.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    session_id: SessionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, SessionId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward messages from channel to WebSocket + periodic ping
    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }

        writer_registry.mark_disconnected(&writer_cid);
    });

    // Reader task: forward WebSocket messages to the relay, track pongs
    let reader_cid = client_id.clone();
    let reader_sid = session_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message
                        .send((reader_cid.clone(), reader_sid.clone(), text.to_string()))
                        .await;
                }
                WsMessage::Pong(_) => {
                    reader_registry.record_pong(&reader_cid);
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum replies automatically
                _ => {}
            }
        }
    });

    // Disconnect is the normal termination path, not an error.
    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "dead client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_register_and_unregister() {
        let registry = ClientRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register(SessionId::new());
        let (id2, _rx2) = registry.register(SessionId::new());
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);

        // Unregister of an already-removed client is a no-op.
        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);

        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn clients_are_bound_to_their_session() {
        let registry = ClientRegistry::new(32);
        let session = SessionId::new();
        let (id, _rx) = registry.register(session.clone());

        assert_eq!(registry.session_of(&id), Some(session.clone()));

        let members = registry.clients_for_session(&session);
        assert_eq!(members, vec![id]);
    }

    #[test]
    fn broadcast_excludes_sender() {
        let registry = ClientRegistry::new(32);
        let session = SessionId::new();
        let (sender, mut sender_rx) = registry.register(session.clone());
        let (_a, mut a_rx) = registry.register(session.clone());
        let (_b, mut b_rx) = registry.register(session.clone());
        let (_other, mut other_rx) = registry.register(SessionId::new());

        registry.broadcast_to_session(&session, "hello", Some(&sender));

        assert_eq!(a_rx.try_recv().unwrap(), "hello");
        assert_eq!(b_rx.try_recv().unwrap(), "hello");
        assert!(sender_rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_exclusion_reaches_everyone() {
        let registry = ClientRegistry::new(32);
        let session = SessionId::new();
        let (_a, mut a_rx) = registry.register(session.clone());
        let (_b, mut b_rx) = registry.register(session.clone());

        registry.broadcast_to_session(&session, "ended", None);

        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_specific_client() {
        let registry = ClientRegistry::new(32);
        let (id, mut rx) = registry.register(SessionId::new());

        assert!(registry.send_to(&id, "test message".into()));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, "test message");
    }

    #[test]
    fn send_to_nonexistent_client() {
        let registry = ClientRegistry::new(32);
        assert!(!registry.send_to(&ClientId::new(), "test".into()));
    }

    #[test]
    fn send_to_full_queue_drops() {
        let registry = ClientRegistry::new(2); // tiny queue
        let (id, _rx) = registry.register(SessionId::new());

        assert!(registry.send_to(&id, "msg1".into()));
        assert!(registry.send_to(&id, "msg2".into()));

        // Queue is full — this one is dropped.
        assert!(!registry.send_to(&id, "msg3".into()));
    }

    #[test]
    fn cleanup_dead_clients_removes_expired() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register(SessionId::new());
        assert_eq!(registry.count(), 1);

        // Manually set last_pong to far in the past
        registry
            .clients
            .get(&id)
            .unwrap()
            .last_pong
            .store(0, Ordering::Relaxed);

        let removed = registry.cleanup_dead_clients();
        assert_eq!(removed, 1);
        assert_eq!(registry.count(), 0);
    }
}
