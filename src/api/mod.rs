//! HTTP relay gateway for the conversation front end
//!
//! Accepts one recorded turn per request on `POST /api/talk` and answers
//! with playable audio, either echoed back (mock mode) or fetched from a
//! downstream webhook.

pub mod health;
pub mod talk;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::ServerConfig;
use crate::transport::{DEFAULT_TIMEOUT, HttpTransport};

pub use talk::RelayError;

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Multipart field the downstream webhook expects
pub const DOWNSTREAM_FIELD: &str = "file";

/// How uploads are answered
#[derive(Clone)]
pub enum RelayMode {
    /// Echo the uploaded audio
    Mock,
    /// Forward to the downstream webhook
    Forward(Arc<HttpTransport>),
    /// Live mode without a downstream URL
    Unconfigured,
}

impl RelayMode {
    /// Short name for logs and health
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Forward(_) | Self::Unconfigured => "live",
        }
    }
}

/// Shared state for relay handlers
pub struct RelayState {
    pub mode: RelayMode,
}

impl RelayState {
    /// Build relay state from server configuration
    ///
    /// # Errors
    ///
    /// Returns error if the downstream HTTP client cannot be built
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let mode = if config.mock_mode {
            RelayMode::Mock
        } else if let Some(url) = &config.downstream_url {
            let transport = HttpTransport::new(url.clone(), DEFAULT_TIMEOUT)?
                .with_field(DOWNSTREAM_FIELD);
            RelayMode::Forward(Arc::new(transport))
        } else {
            tracing::warn!("no downstream url configured; /api/talk will return 503");
            RelayMode::Unconfigured
        };

        Ok(Self { mode })
    }
}

/// Build the relay router
///
/// Serves `static_dir` with an `index.html` fallback when it exists.
pub fn router(state: Arc<RelayState>, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .nest("/api", talk::router(state.clone()))
        .merge(health::router(state));

    // Serve static files if present
    if let Some(static_dir) = static_dir.filter(|dir| dir.is_dir()) {
        let index_file = static_dir.join("index.html");
        let serve_dir = ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

        router = router.fallback_service(serve_dir);
        tracing::info!(path = %static_dir.display(), "serving static files");
    }

    // CORS layer for cross-origin requests from the front end
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Relay gateway server
pub struct ApiServer {
    state: Arc<RelayState>,
    port: u16,
    static_dir: PathBuf,
}

impl ApiServer {
    /// Create a server from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the downstream HTTP client cannot be built
    pub fn new(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            state: Arc::new(RelayState::from_config(config)?),
            port: config.port,
            static_dir: config.static_dir.clone(),
        })
    }

    /// Run the relay server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind relay server: {e}")))?;

        tracing::info!(
            port = self.port,
            mode = self.state.mode.name(),
            url = %format!("http://localhost:{}", self.port),
            "relay server listening"
        );

        axum::serve(listener, router(self.state, Some(&self.static_dir)))
            .await
            .map_err(|e| crate::Error::Config(format!("relay server error: {e}")))?;

        Ok(())
    }
}
