//! Typed client for the server's REST endpoints.
//!
//! Request failures are surfaced to the caller as [`ApiError`] and never
//! retried here; retry and notification policy belong to the UI layer.

use std::sync::Arc;

use recdash_proto::api::{
    GlobalConfig, JobOutput, NewStreamer, NewStreamerFilter, NotificationChannel, PipelineJob,
    RecordTemplate, Session, Streamer, StreamerFilter, SystemHealth,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::session::SessionSource;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unauthorized")]
    Unauthorized,
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionSource>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, session: Arc<dyn SessionSource>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            session,
        }
    }

    // ── auth ──────────────────────────────────────────────────────────────

    /// Validate the current token with the server.  Returns `None` when
    /// there is no token or the server rejects it; other failures bubble
    /// up as errors.
    pub async fn check_auth(&self) -> Result<Option<Session>, ApiError> {
        if self.session.current().is_none() {
            return Ok(None);
        }
        match self.get::<Session>("/api/auth/me").await {
            Ok(session) => Ok(Some(session)),
            Err(ApiError::Unauthorized) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── global config ─────────────────────────────────────────────────────

    pub async fn global_config(&self) -> Result<GlobalConfig, ApiError> {
        self.get("/api/config").await
    }

    pub async fn update_global_config(&self, config: &GlobalConfig) -> Result<(), ApiError> {
        self.put_unit("/api/config", config).await
    }

    // ── streamers ─────────────────────────────────────────────────────────

    pub async fn streamers(&self) -> Result<Vec<Streamer>, ApiError> {
        self.get("/api/streamers").await
    }

    pub async fn streamer(&self, id: &str) -> Result<Streamer, ApiError> {
        self.get(&format!("/api/streamers/{}", id)).await
    }

    pub async fn create_streamer(&self, body: &NewStreamer) -> Result<Streamer, ApiError> {
        self.post("/api/streamers", body).await
    }

    pub async fn update_streamer(&self, streamer: &Streamer) -> Result<(), ApiError> {
        self.put_unit(&format!("/api/streamers/{}", streamer.id), streamer)
            .await
    }

    pub async fn delete_streamer(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/streamers/{}", id)).await
    }

    // ── templates ─────────────────────────────────────────────────────────

    pub async fn templates(&self) -> Result<Vec<RecordTemplate>, ApiError> {
        self.get("/api/templates").await
    }

    pub async fn create_template(&self, body: &RecordTemplate) -> Result<RecordTemplate, ApiError> {
        self.post("/api/templates", body).await
    }

    pub async fn delete_template(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/templates/{}", id)).await
    }

    // ── filters ───────────────────────────────────────────────────────────

    pub async fn filters(&self) -> Result<Vec<StreamerFilter>, ApiError> {
        self.get("/api/filters").await
    }

    pub async fn create_filter(&self, body: &NewStreamerFilter) -> Result<StreamerFilter, ApiError> {
        self.post("/api/filters", body).await
    }

    pub async fn delete_filter(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/filters/{}", id)).await
    }

    // ── notification channels ─────────────────────────────────────────────

    pub async fn notification_channels(&self) -> Result<Vec<NotificationChannel>, ApiError> {
        self.get("/api/channels").await
    }

    pub async fn create_notification_channel(
        &self,
        body: &NotificationChannel,
    ) -> Result<NotificationChannel, ApiError> {
        self.post("/api/channels", body).await
    }

    pub async fn delete_notification_channel(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/channels/{}", id)).await
    }

    // ── pipeline ──────────────────────────────────────────────────────────

    pub async fn jobs(&self, streamer_id: Option<&str>) -> Result<Vec<PipelineJob>, ApiError> {
        let response = self.jobs_request(streamer_id).send().await?;
        Ok(check(response).await?.json().await?)
    }

    fn jobs_request(&self, streamer_id: Option<&str>) -> reqwest::RequestBuilder {
        let mut request = self.request(reqwest::Method::GET, "/api/jobs");
        if let Some(id) = streamer_id {
            // `.query` percent-encodes; ids are not guaranteed URL-safe.
            request = request.query(&[("streamer_id", id)]);
        }
        request
    }

    pub async fn job_outputs(&self, job_id: &str) -> Result<Vec<JobOutput>, ApiError> {
        self.get(&format!("/api/jobs/{}/outputs", job_id)).await
    }

    // ── system ────────────────────────────────────────────────────────────

    pub async fn system_health(&self) -> Result<SystemHealth, ApiError> {
        self.get("/api/health").await
    }

    // ── plumbing ──────────────────────────────────────────────────────────

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        let mut builder = self.http.request(method, url);
        if let Some(session) = self.session.current() {
            builder = builder.bearer_auth(session.token);
        }
        builder
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(reqwest::Method::GET, path).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn put_unit<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::PUT, path)
            .json(body)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let response = self.request(reqwest::Method::DELETE, path).send().await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticToken;

    #[test]
    fn test_jobs_query_is_percent_encoded() {
        let client = ApiClient::new("http://localhost:1", Arc::new(StaticToken::anonymous()));

        let request = client.jobs_request(Some("a&b c")).build().unwrap();
        assert_eq!(request.url().query(), Some("streamer_id=a%26b+c"));

        let bare = client.jobs_request(None).build().unwrap();
        assert!(bare.url().query().is_none());
    }
}
