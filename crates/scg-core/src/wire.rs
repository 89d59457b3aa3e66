//! WebSocket message envelopes. Everything on the wire is a tagged JSON
//! object `{type, payload}`; unknown types decode to `Unknown` so newer
//! clients keep working against older servers.

use serde::{Deserialize, Serialize};

use crate::sample::{ResampledPoint, Sample};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplesPayload {
    pub samples: Vec<Sample>,
}

/// Inbound message from a streaming client.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SamplesBatch { payload: SamplesPayload },
    #[serde(other)]
    Unknown,
}

/// Outbound message to a streaming client.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SamplesBatch { payload: SamplesPayload },
    InterpolatedBatch { payload: InterpolatedPayload },
    SessionEnded,
}

#[derive(Clone, Debug, Serialize)]
pub struct InterpolatedPayload {
    #[serde(rename = "interpolatedSamples")]
    pub interpolated_samples: Vec<ResampledPoint>,
}

/// Error frame sent back to the offending connection only; the connection
/// stays open.
#[derive(Clone, Debug, Serialize)]
pub struct WsError {
    pub error: String,
    pub details: String,
}

impl WsError {
    pub fn invalid_message(details: impl Into<String>) -> Self {
        Self {
            error: "Invalid message format".to_string(),
            details: details.into(),
        }
    }
}

impl ServerMessage {
    /// The one-shot historical replay delivered on join.
    pub fn historical_batch(samples: Vec<Sample>) -> Self {
        Self::SamplesBatch {
            payload: SamplesPayload { samples },
        }
    }
}
