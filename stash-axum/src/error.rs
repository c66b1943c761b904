use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use stash_blob::BlobError;
use stash_core::StashError;

/// Route failure rendered as `{"error": …, "details"?: …}`.
///
/// `details` carries the raw error and is only attached when the server
/// runs in development mode.
#[derive(Debug)]
pub struct ApiError {
    error: StashError,
    expose_details: bool,
}

impl ApiError {
    pub fn new(error: StashError) -> Self {
        Self {
            error,
            expose_details: false,
        }
    }

    pub fn with_details(mut self, expose: bool) -> Self {
        self.expose_details = expose;
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.error.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }
}

impl From<StashError> for ApiError {
    fn from(error: StashError) -> Self {
        Self::new(error)
    }
}

impl From<BlobError> for ApiError {
    fn from(error: BlobError) -> Self {
        Self::new(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.error, detail = ?self.error.detail(), "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.error, "request rejected");
        }

        let mut body = json!({ "error": self.error.message });
        if self.expose_details {
            if let Some(detail) = self.error.detail() {
                body["details"] = json!(detail);
            }
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_core::ErrorKind;

    #[test]
    fn details_only_when_exposed() {
        let err = ApiError::from(BlobError::not_found("a.txt"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(!err.expose_details);

        let dev = ApiError::new(StashError::new(ErrorKind::ClientClosedRequest, "gone")).with_details(true);
        assert_eq!(dev.status().as_u16(), 499);
        assert_eq!(dev.message(), "gone");
    }
}
