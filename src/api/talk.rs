//! Turn relay endpoint

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;

use super::{RelayMode, RelayState};
use crate::transport::{AUDIO_FIELD, TurnTransport};
use crate::voice::TurnPayload;

/// Field name accepted alongside `audio`
const FILE_FIELD: &str = "file";

/// Content type assumed for uploads that do not declare one
const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "audio/wav";

/// File name forwarded when the upload has none
const DEFAULT_UPLOAD_FILE_NAME: &str = "input.webm";

/// Build talk router
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/talk", post(talk))
        .with_state(state)
}

/// Relay one recorded turn
///
/// Returns the response audio with its content type.
async fn talk(
    State(state): State<Arc<RelayState>>,
    mut multipart: Multipart,
) -> Result<Response, RelayError> {
    let upload = read_upload(&mut multipart).await?;
    tracing::info!(
        bytes = upload.bytes.len(),
        content_type = %upload.content_type,
        "received audio upload"
    );

    match &state.mode {
        RelayMode::Mock => {
            tracing::info!("mock mode, echoing upload");
            Ok(audio_response(upload.content_type, upload.bytes))
        }
        RelayMode::Forward(transport) => {
            tracing::info!(url = transport.url(), "forwarding upload downstream");

            let response = transport.send(upload).await.map_err(|e| {
                tracing::error!(error = %e, "downstream request failed");
                RelayError::ProcessingFailed
            })?;

            Ok(audio_response(response.content_type, response.bytes))
        }
        RelayMode::Unconfigured => Err(RelayError::NotConfigured),
    }
}

/// Pull the first `audio` or `file` field out of the form
async fn read_upload(multipart: &mut Multipart) -> Result<TurnPayload, RelayError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::BadRequest(format!("multipart error: {e}")))?
    {
        if !matches!(field.name(), Some(AUDIO_FIELD | FILE_FIELD)) {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_UPLOAD_CONTENT_TYPE)
            .to_string();
        let file_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_UPLOAD_FILE_NAME)
            .to_string();

        let bytes = field
            .bytes()
            .await
            .map_err(|e| RelayError::BadRequest(format!("failed to read upload: {e}")))?;

        if bytes.is_empty() {
            return Err(RelayError::NoAudio);
        }

        return Ok(TurnPayload {
            bytes: bytes.to_vec(),
            content_type,
            file_name,
        });
    }

    Err(RelayError::NoAudio)
}

fn audio_response(content_type: String, bytes: Vec<u8>) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], bytes).into_response()
}

/// Relay API errors
#[derive(Debug)]
pub enum RelayError {
    NoAudio,
    BadRequest(String),
    ProcessingFailed,
    NotConfigured,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NoAudio => (
                StatusCode::BAD_REQUEST,
                "no_audio",
                "No audio file provided.".to_string(),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::ProcessingFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "processing_failed",
                "Error processing voice request.".to_string(),
            ),
            Self::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                "No downstream webhook configured.".to_string(),
            ),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
