use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  The client compares this against the server's `Hello`
/// and logs a mismatch; unknown frames still fail to decode on their own.
pub const PROTOCOL_VERSION: u32 = 1;

/// Control frames sent from client to server over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { streamer_id: String },
    Unsubscribe { streamer_id: String },
}

impl ClientFrame {
    pub fn streamer_id(&self) -> &str {
        match self {
            ClientFrame::Subscribe { streamer_id } => streamer_id,
            ClientFrame::Unsubscribe { streamer_id } => streamer_id,
        }
    }

    /// Serialize for a WebSocket text frame.
    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Push frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent immediately on connect: server version handshake.
    Hello {
        protocol_version: u32,
        server_rev: u64,
    },
    /// Latest telemetry for one streamer.  Replaces any previous record
    /// for the same streamer wholesale.
    Progress { record: ProgressRecord },
    /// The download finished, failed or was cancelled; the record for the
    /// streamer should be dropped.
    Ended {
        streamer_id: String,
        reason: EndReason,
    },
    /// Non-fatal server-side notice.
    Error { message: String },
}

/// Download lifecycle as reported by the recording pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Queued, no bytes flowing yet.
    #[default]
    Pending,
    /// Actively recording.
    Recording,
    /// Paused by the pipeline (e.g. stream went offline mid-segment).
    Paused,
    /// Errored but still tracked; a retry may follow.
    Failed,
}

/// Why a download left the live set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Cancelled,
    Failed { message: String },
}

/// Latest known telemetry for an in-flight download, keyed by streamer id.
/// Only ever produced by the server; the client merges but never edits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub streamer_id: String,
    pub state: DownloadState,
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default)]
    pub rate_bytes_per_sec: f64,
    #[serde(default)]
    pub elapsed_secs: f64,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn new(streamer_id: impl Into<String>) -> Self {
        Self {
            streamer_id: streamer_id.into(),
            state: DownloadState::Pending,
            bytes_transferred: 0,
            rate_bytes_per_sec: 0.0,
            elapsed_secs: 0.0,
            output_path: None,
            updated_at: None,
        }
    }
}

impl ServerFrame {
    pub fn decode(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
