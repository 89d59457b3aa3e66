//! Central relay: consumes inbound frames from all connections, validates
//! the envelope, fans the batch out to sibling connections, and appends the
//! raw samples to the session buffer.

use std::sync::Arc;

use tokio::sync::mpsc;

use scg_core::resample::resample;
use scg_core::sample::ResampledPoint;
use scg_core::wire::{ClientMessage, InterpolatedPayload, ServerMessage, WsError};
use scg_core::{ClientId, SessionId};

use crate::client::ClientRegistry;
use crate::registry::SessionRegistry;

/// Process inbound client frames until all senders hang up. One instance of
/// this task serves the whole server; FIFO order per sender is preserved by
/// the channel.
pub async fn process_messages(
    mut rx: mpsc::Receiver<(ClientId, SessionId, String)>,
    clients: Arc<ClientRegistry>,
    sessions: Arc<SessionRegistry>,
    resample_broadcast: bool,
) {
    while let Some((client_id, session_id, raw)) = rx.recv().await {
        handle_frame(
            &clients,
            &sessions,
            resample_broadcast,
            &client_id,
            &session_id,
            &raw,
        );
    }
}

fn handle_frame(
    clients: &ClientRegistry,
    sessions: &SessionRegistry,
    resample_broadcast: bool,
    client_id: &ClientId,
    session_id: &SessionId,
    raw: &str,
) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(msg) => msg,
        Err(e) => {
            // Malformed input is reported to the sender only; the
            // connection stays open.
            let err = WsError::invalid_message(e.to_string());
            if let Ok(json) = serde_json::to_string(&err) {
                clients.send_to(client_id, json);
            }
            return;
        }
    };

    match message {
        ClientMessage::SamplesBatch { payload } => {
            if payload.samples.is_empty() {
                return;
            }

            if resample_broadcast {
                broadcast_resampled(clients, client_id, session_id, &payload.samples);
            } else {
                clients.broadcast_to_session(session_id, raw, Some(client_id));
            }

            match sessions.append_samples(session_id, payload.samples) {
                Ok(len) => {
                    tracing::trace!(session_id = %session_id, buffered = len, "samples appended");
                }
                Err(e) => {
                    // The connection was accepted for a session the registry
                    // never saw; relay already happened, buffering is dropped.
                    tracing::warn!(session_id = %session_id, error = %e, "buffer append failed");
                }
            }
        }
        ClientMessage::Unknown => {
            tracing::debug!(client_id = %client_id, "ignoring unknown message type");
        }
    }
}

fn broadcast_resampled(
    clients: &ClientRegistry,
    client_id: &ClientId,
    session_id: &SessionId,
    samples: &[scg_core::Sample],
) {
    let (values, timestamps) = resample(samples);
    if values.is_empty() {
        return;
    }

    let interpolated_samples = timestamps
        .iter()
        .zip(&values)
        .map(|(&t, &az)| ResampledPoint { t: t as i64, az })
        .collect();

    let msg = ServerMessage::InterpolatedBatch {
        payload: InterpolatedPayload {
            interpolated_samples,
        },
    };
    if let Ok(json) = serde_json::to_string(&msg) {
        clients.broadcast_to_session(session_id, &json, Some(client_id));
    }
}
