use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use scg_core::wire::ServerMessage;
use scg_core::{ClientId, SessionId};
use scg_store::Database;

use crate::client::{self, ClientRegistry};
use crate::handlers;
use crate::registry::SessionRegistry;
use crate::relay;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    /// Legacy pipeline variant: broadcast the resampled 100 Hz signal
    /// instead of relaying the raw envelope.
    pub resample_broadcast: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            max_send_queue: 256,
            resample_broadcast: false,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub clients: Arc<ClientRegistry>,
    pub db: Database,
    pub message_tx: mpsc::Sender<(ClientId, SessionId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/sessions", post(handlers::create_session))
        .route("/api/v1/sessions/{session_id}/end", post(handlers::end_session))
        .route("/api/v1/sessions/{session_id}", get(handlers::get_session))
        .route(
            "/api/v1/sessions/{session_id}/data",
            get(handlers::get_session_data),
        )
        .route("/ws/{session_id}", get(ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let sessions = Arc::new(SessionRegistry::new());
    let clients = Arc::new(ClientRegistry::new(config.max_send_queue));

    // Dead-client cleanup task (every 60s)
    let _cleanup = client::start_cleanup_task(
        Arc::clone(&clients),
        std::time::Duration::from_secs(60),
    );

    // Inbound frame channel feeding the relay
    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, SessionId, String)>(1024);

    let relay_handle = tokio::spawn(relay::process_messages(
        msg_rx,
        Arc::clone(&clients),
        Arc::clone(&sessions),
        config.resample_broadcast,
    ));

    let app_state = AppState {
        sessions,
        clients,
        db,
        message_tx: msg_tx,
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "OpenSCG server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _relay: relay_handle,
        _cleanup,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _relay: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler, one connection per streaming client.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session_id = SessionId::from_raw(session_id);
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Accept a new WebSocket connection: register it under its session, replay
/// the buffered history, then run the connection loop until disconnect.
async fn handle_socket(socket: WebSocket, session_id: SessionId, state: AppState) {
    let (client_id, rx) = state.clients.register(session_id.clone());
    tracing::info!(client_id = %client_id, session_id = %session_id, "WebSocket client connected");

    send_historical(&state, &client_id, &session_id);

    client::handle_ws_connection(
        socket,
        client_id,
        session_id,
        rx,
        state.clients,
        state.message_tx,
    )
    .await;
}

/// One-shot historical replay for a freshly joined connection. Connections
/// to sessions the registry has never seen are still accepted; they (and
/// joins to sessions with an empty buffer) just get no history.
fn send_historical(state: &AppState, client_id: &ClientId, session_id: &SessionId) {
    if let Some(samples) = state.sessions.snapshot(session_id) {
        if !samples.is_empty() {
            let count = samples.len();
            let batch = ServerMessage::historical_batch(samples);
            if let Ok(json) = serde_json::to_string(&batch) {
                state.clients.send_to(client_id, json);
                tracing::debug!(client_id = %client_id, samples = count, "sent historical batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_state() -> AppState {
        let (msg_tx, _rx) = mpsc::channel(32);
        AppState {
            sessions: Arc::new(SessionRegistry::new()),
            clients: Arc::new(ClientRegistry::new(32)),
            db: Database::in_memory().unwrap(),
            message_tx: msg_tx,
        }
    }

    #[test]
    fn build_router_creates_routes() {
        let _router = build_router(app_state());
        // If this doesn't panic, the router was built successfully
    }

    #[test]
    fn join_replays_buffered_history_exactly_once() {
        let state = app_state();
        let session_id = SessionId::new();
        state.sessions.create(&session_id, chrono::Utc::now()).unwrap();
        let samples: Vec<scg_core::Sample> = (0..3)
            .map(|i| scg_core::Sample {
                t: i as f64 * 10.0,
                ax: 0.0,
                ay: 0.0,
                az: i as f64,
            })
            .collect();
        state.sessions.append_samples(&session_id, samples).unwrap();

        let (client_id, mut rx) = state.clients.register(session_id.clone());
        send_historical(&state, &client_id, &session_id);

        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "samples_batch");
        assert_eq!(msg["payload"]["samples"].as_array().unwrap().len(), 3);

        // Exactly one batch; nothing else queued.
        assert!(rx.try_recv().is_err());
        // Replay is a copy: the buffer is still intact for the flush.
        assert_eq!(state.sessions.buffered_len(&session_id), Some(3));
    }

    #[test]
    fn join_with_empty_buffer_gets_no_history() {
        let state = app_state();
        let session_id = SessionId::new();
        state.sessions.create(&session_id, chrono::Utc::now()).unwrap();

        let (client_id, mut rx) = state.clients.register(session_id.clone());
        send_historical(&state, &client_id, &session_id);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn join_to_unknown_session_gets_no_history() {
        let state = app_state();
        let session_id = SessionId::new();

        let (client_id, mut rx) = state.clients.register(session_id.clone());
        send_historical(&state, &client_id, &session_id);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0, // Random port
            ..Default::default()
        };

        let handle = start(config, Database::in_memory().unwrap()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, Database::in_memory().unwrap()).await.unwrap();
        let base = format!("http://127.0.0.1:{}/api/v1", handle.port);
        let client = reqwest::Client::new();

        // Create
        let resp = client
            .post(format!("{base}/sessions"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = resp.json().await.unwrap();
        let session_id = body["sessionId"].as_str().unwrap().to_string();
        assert_eq!(body["status"], "created");
        assert_eq!(body["websocketUrl"], format!("/ws/{session_id}"));

        // Metadata
        let resp = client
            .get(format!("{base}/sessions/{session_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        // End
        let resp = client
            .post(format!("{base}/sessions/{session_id}/end"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["samplesSaved"], 0);

        // Second end is a 404
        let resp = client
            .post(format!("{base}/sessions/{session_id}/end"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        // Data of the ended session: empty list, not 404
        let resp = client
            .get(format!("{base}/sessions/{session_id}/data"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["samples"].as_array().unwrap().is_empty());

        // Unknown session everywhere: 404 with detail body
        let resp = client
            .get(format!("{base}/sessions/sess_missing"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["detail"], "Session not found");
    }
}
