//! # Errors
//!
//! stash keeps one structured error shape for everything that ends up at an
//! HTTP boundary: a closed set of kinds, each with a status code, plus a
//! client-facing message and an optional raw cause. The server crate decides
//! how to serialize it.
//!
//! The status set follows the usual HTTP meanings plus `499`, which the
//! management routes use for operations aborted by cancellation or timeout.

use std::fmt;

use anyhow::Error as AnyError;

/// Error names + status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,           // 400
    NotAuthenticated,     // 401
    Forbidden,            // 403
    NotFound,             // 404
    Timeout,              // 408
    Conflict,             // 409
    PayloadTooLarge,      // 413
    UnsupportedMediaType, // 415
    Unprocessable,        // 422
    TooManyRequests,      // 429
    ClientClosedRequest,  // 499
    GeneralError,         // 500
    NotImplemented,       // 501
    BadGateway,           // 502
    Unavailable,          // 503
    GatewayTimeout,       // 504
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotAuthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::Conflict => 409,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::UnsupportedMediaType => 415,
            ErrorKind::Unprocessable => 422,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::ClientClosedRequest => 499,
            ErrorKind::GeneralError => 500,
            ErrorKind::NotImplemented => 501,
            ErrorKind::BadGateway => 502,
            ErrorKind::Unavailable => 503,
            ErrorKind::GatewayTimeout => 504,
        }
    }

    /// Error `name` (e.g. "NotFound")
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotAuthenticated => "NotAuthenticated",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::UnsupportedMediaType => "UnsupportedMediaType",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::TooManyRequests => "TooManyRequests",
            ErrorKind::ClientClosedRequest => "ClientClosedRequest",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::NotImplemented => "NotImplemented",
            ErrorKind::BadGateway => "BadGateway",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::GatewayTimeout => "GatewayTimeout",
        }
    }

    /// Whether a failure of this kind is worth retrying with backoff.
    ///
    /// Only throttling and upstream-availability statuses qualify; client
    /// errors and cancellations never do.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::TooManyRequests
                | ErrorKind::BadGateway
                | ErrorKind::Unavailable
                | ErrorKind::GatewayTimeout
        )
    }

    /// Map an HTTP status back to a kind. Unknown 4xx become `BadRequest`,
    /// unknown 5xx become `GeneralError`.
    pub fn from_status(status: u16) -> ErrorKind {
        match status {
            401 => ErrorKind::NotAuthenticated,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            409 => ErrorKind::Conflict,
            413 => ErrorKind::PayloadTooLarge,
            415 => ErrorKind::UnsupportedMediaType,
            422 => ErrorKind::Unprocessable,
            429 => ErrorKind::TooManyRequests,
            499 => ErrorKind::ClientClosedRequest,
            501 => ErrorKind::NotImplemented,
            502 => ErrorKind::BadGateway,
            503 => ErrorKind::Unavailable,
            504 => ErrorKind::GatewayTimeout,
            400..=499 => ErrorKind::BadRequest,
            _ => ErrorKind::GeneralError,
        }
    }
}

/// A structured stash error: what the client is told, and optionally the
/// underlying failure for server-side diagnostics.
#[derive(Debug)]
pub struct StashError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<AnyError>,
}

impl StashError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    /// Copy suitable for returning to clients; the raw `source` is dropped.
    pub fn sanitize_for_client(&self) -> StashError {
        StashError::new(self.kind, self.message.clone())
    }

    /// Raw description of the underlying failure, if one was attached.
    pub fn detail(&self) -> Option<String> {
        self.source.as_ref().map(|e| format!("{e:#}"))
    }
}

impl fmt::Display for StashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind.name(), self.code(), self.message)
    }
}

impl std::error::Error for StashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_requests_use_499() {
        let err = StashError::new(ErrorKind::ClientClosedRequest, "Copy operation was cancelled");
        assert_eq!(err.code(), 499);
        assert_eq!(
            err.to_string(),
            "ClientClosedRequest (499): Copy operation was cancelled"
        );
    }

    #[test]
    fn sanitize_drops_source() {
        let err = StashError::new(ErrorKind::GeneralError, "Failed to list blobs")
            .with_source(anyhow::anyhow!("connection reset by peer"));
        assert!(err.detail().unwrap().contains("connection reset"));
        assert!(std::error::Error::source(&err).is_some());

        let safe = err.sanitize_for_client();
        assert!(safe.source.is_none());
        assert!(safe.detail().is_none());
        assert_eq!(safe.message, "Failed to list blobs");
        assert_eq!(safe.kind, ErrorKind::GeneralError);
    }

    #[test]
    fn status_round_trip_for_known_kinds() {
        for kind in [
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::TooManyRequests,
            ErrorKind::ClientClosedRequest,
            ErrorKind::Unavailable,
        ] {
            assert_eq!(ErrorKind::from_status(kind.status_code()), kind);
        }
        assert_eq!(ErrorKind::from_status(418), ErrorKind::BadRequest);
        assert_eq!(ErrorKind::from_status(599), ErrorKind::GeneralError);
    }

    #[test]
    fn only_throttling_and_upstream_kinds_are_transient() {
        assert!(ErrorKind::TooManyRequests.is_transient());
        assert!(ErrorKind::Unavailable.is_transient());
        assert!(!ErrorKind::Forbidden.is_transient());
        assert!(!ErrorKind::ClientClosedRequest.is_transient());
        assert!(!ErrorKind::GeneralError.is_transient());
    }
}
