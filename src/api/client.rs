use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use super::http::send_with_retry;
use super::types::{SessionInfo, StartSessionRequest, StreamSessionRequest};
use super::{AnalysisBackend, ByteStream};
use crate::config::Config;
use crate::error::SessionError;

/// Default client version (from Cargo.toml)
const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

fn build_user_agent() -> String {
    std::env::var("VULNSCAN_USER_AGENT")
        .unwrap_or_else(|_| format!("vulnscan/{}", DEFAULT_VERSION))
}

/// HTTP implementation of the analysis backend
pub struct HttpBackend {
    /// Client for short request/response calls
    client: Client,
    /// Client without a total timeout, for the long-lived event stream
    stream_client: Client,
    base_url: Url,
    user_agent: String,
    start_retries: usize,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(SessionError::transport)?;
        let stream_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(SessionError::transport)?;

        Ok(Self {
            client,
            stream_client,
            base_url: config.api_url.clone(),
            user_agent: build_user_agent(),
            start_retries: config.start_retries,
        })
    }

    fn build_url(base_url: &Url, endpoint: &str) -> Result<Url, SessionError> {
        base_url.join(endpoint).map_err(|e| {
            SessionError::Transport(format!("Failed to build URL for endpoint {}: {}", endpoint, e))
        })
    }

    fn request(&self, client: &Client, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        client
            .request(method, url)
            .header("User-Agent", &self.user_agent)
            .header("x-request-id", Uuid::new_v4().to_string())
    }

    /// Turn a non-2xx response into a status error carrying the body text.
    async fn check_status(
        response: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, SessionError> {
        let status = response.status();
        debug!("{} response status: {}", what, status);

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!("{} failed with status {}: {}", what, status, body);
        Err(SessionError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn start_session(&self, user_id: &str) -> Result<SessionInfo, SessionError> {
        let url = Self::build_url(&self.base_url, "sessions")?;
        let body = StartSessionRequest { user_id };
        debug!("Starting session at {}", url);

        let response = send_with_retry(
            || {
                self.request(&self.client, reqwest::Method::POST, url.clone())
                    .json(&body)
            },
            self.start_retries,
        )
        .await?;
        let response = Self::check_status(response, "Start session").await?;

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            SessionError::Transport(format!("Failed to parse start-session response: {}", e))
        })
    }

    async fn stream_session(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<ByteStream, SessionError> {
        let url = Self::build_url(&self.base_url, &format!("sessions/{}/stream", session_id))?;
        debug!("Opening event stream at {}", url);

        let response = self
            .request(&self.stream_client, reqwest::Method::POST, url)
            .header("Accept", "text/event-stream")
            .json(&StreamSessionRequest { message })
            .send()
            .await?;
        let response = Self::check_status(response, "Stream session").await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(SessionError::from));
        Ok(Box::pin(bytes))
    }

    async fn end_session(&self, session_id: &str) -> Result<(), SessionError> {
        let url = Self::build_url(&self.base_url, &format!("sessions/{}", session_id))?;
        debug!("Ending session at {}", url);

        let response = self
            .request(&self.client, reqwest::Method::DELETE, url)
            .send()
            .await?;
        Self::check_status(response, "End session").await?;
        Ok(())
    }
}
