//! Request/response shapes for the server's REST endpoints.
//!
//! The server owns these schemas; the client only deserializes what it
//! needs and round-trips unknown-free payloads back on writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Global recorder settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub output_dir: String,
    #[serde(default)]
    pub output_file_format: String,
    #[serde(default)]
    pub max_concurrent_downloads: u32,
    #[serde(default)]
    pub max_part_size_bytes: Option<u64>,
    #[serde(default)]
    pub max_part_duration_secs: Option<u64>,
    #[serde(default)]
    pub delete_files_after_upload: bool,
}

/// A monitored live-content source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Streamer {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Body for creating a streamer; the server assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStreamer {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub template_id: Option<String>,
}

/// A reusable bundle of download/upload settings applied to streamers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub output_file_format: Option<String>,
    #[serde(default)]
    pub cookies: Option<String>,
}

/// Server-side predicate deciding which live streams get recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerFilter {
    pub id: String,
    pub name: String,
    /// Filter expression; the evaluation engine lives server-side.
    pub expression: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Body for creating a filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStreamerFilter {
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Where completion/error notifications are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    /// e.g. "webhook", "telegram", "email"
    pub kind: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub enabled: bool,
}

/// One unit of post-processing work (remux, upload, thumbnail, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: String,
    pub streamer_id: String,
    pub kind: String,
    pub status: JobStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// A file produced by a finished recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub path: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Coarse server health, for the status view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub version: String,
    #[serde(default)]
    pub uptime_secs: u64,
    #[serde(default)]
    pub active_downloads: u32,
    #[serde(default)]
    pub queued_jobs: u32,
    #[serde(default)]
    pub disk_free_bytes: Option<u64>,
}

/// An authenticated session as returned by the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(t) => t <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let fresh = Session {
            token: "t".into(),
            expires_at: Some(now + chrono::Duration::minutes(5)),
        };
        assert!(!fresh.is_expired(now));

        let stale = Session {
            token: "t".into(),
            expires_at: Some(now - chrono::Duration::minutes(5)),
        };
        assert!(stale.is_expired(now));

        let eternal = Session {
            token: "t".into(),
            expires_at: None,
        };
        assert!(!eternal.is_expired(now));
    }

    #[test]
    fn test_streamer_tolerates_missing_optionals() {
        let json = r#"{"id":"s1","name":"someone","url":"https://example.com/live"}"#;
        let s: Streamer = serde_json::from_str(json).unwrap();
        assert_eq!(s.id, "s1");
        assert!(!s.enabled);
        assert!(s.template_id.is_none());
    }
}
