use axum::{extract::rejection::JsonRejection, extract::State, Json};
use stash_blob::{handle_upload, HandleUploadBody, HandleUploadResponse};
use stash_core::{ErrorKind, StashError};

use crate::{ApiError, StashState};

/// `POST /api/upload`: the token handshake.
///
/// Every failure on this route answers 400, whatever its cause.
pub async fn handshake(
    State(state): State<StashState>,
    body: Result<Json<HandleUploadBody>, JsonRejection>,
) -> Result<Json<HandleUploadResponse>, ApiError> {
    let Json(body) = body.map_err(|e| {
        token_error(
            &state,
            StashError::bad_request("Invalid upload handshake body").with_source(anyhow::Error::new(e)),
        )
    })?;

    let step = match &body {
        HandleUploadBody::GenerateClientToken(p) => {
            tracing::debug!(pathname = %p.pathname, multipart = p.multipart, "token requested");
            "generate-client-token"
        }
        HandleUploadBody::UploadCompleted(c) => {
            tracing::debug!(pathname = %c.blob.pathname, "upload completed");
            "upload-completed"
        }
    };

    handle_upload(state.issuer.as_ref(), body)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(step, error = %e, "upload handshake failed");
            token_error(&state, e)
        })
}

fn token_error(state: &StashState, error: impl Into<StashError>) -> ApiError {
    let mut error = error.into();
    error.kind = ErrorKind::BadRequest;
    state.error(error)
}
