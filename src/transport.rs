//! Turn transport: ships a sealed utterance and returns the spoken response

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::voice::TurnPayload;
use crate::{Error, Result};

/// Multipart field the front end uploads under
pub const AUDIO_FIELD: &str = "audio";

/// Content type assumed when a response does not declare one
pub const DEFAULT_RESPONSE_CONTENT_TYPE: &str = "audio/mpeg";

/// Default request timeout for one round-trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Playable audio returned for a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioResponse {
    /// Encoded audio
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`
    pub content_type: String,
}

/// Sends one sealed turn and waits for its response
///
/// A single attempt per call; failed turns are never retried.
#[async_trait]
pub trait TurnTransport: Send + Sync {
    /// Send `payload` and return the response audio
    ///
    /// # Errors
    ///
    /// Returns error on network failure, non-success status or an empty body
    async fn send(&self, payload: TurnPayload) -> Result<AudioResponse>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Uploads the payload as a multipart form to an HTTP endpoint
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    field: String,
}

impl HttpTransport {
    /// Create a transport posting to `url` under the `audio` field
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
            field: AUDIO_FIELD.to_string(),
        })
    }

    /// Upload under a different multipart field name
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Target URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TurnTransport for HttpTransport {
    async fn send(&self, payload: TurnPayload) -> Result<AudioResponse> {
        tracing::debug!(
            url = %self.url,
            bytes = payload.bytes.len(),
            content_type = %payload.content_type,
            "sending turn"
        );

        let part = reqwest::multipart::Part::bytes(payload.bytes)
            .file_name(payload.file_name)
            .mime_str(&payload.content_type)
            .map_err(|e| Error::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part(self.field.clone(), part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "turn request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "relay returned an error");
            return Err(Error::Transport(format!("relay returned {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_RESPONSE_CONTENT_TYPE)
            .to_string();

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Transport("empty response body".to_string()));
        }

        tracing::info!(bytes = bytes.len(), content_type = %content_type, "response received");

        Ok(AudioResponse {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Mock mode: returns the uploaded audio as the response
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTransport;

#[async_trait]
impl TurnTransport for EchoTransport {
    async fn send(&self, payload: TurnPayload) -> Result<AudioResponse> {
        tracing::info!(bytes = payload.bytes.len(), "mock mode, echoing turn");

        Ok(AudioResponse {
            bytes: payload.bytes,
            content_type: payload.content_type,
        })
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Build the transport for the front end
///
/// # Errors
///
/// Returns error if the HTTP client cannot be built
pub fn build(relay_url: &str, mock: bool, timeout: Duration) -> Result<Arc<dyn TurnTransport>> {
    if mock {
        tracing::info!("turn transport: mock echo");
        return Ok(Arc::new(EchoTransport));
    }

    tracing::info!(url = relay_url, "turn transport: http relay");
    Ok(Arc::new(HttpTransport::new(relay_url, timeout)?))
}
