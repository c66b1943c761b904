//! Maps raw failures onto a user message, a status-like kind and a
//! retriable flag.

use serde::Serialize;
use stash_core::{ErrorKind, StashError};

use crate::BlobError;

const MSG_NETWORK: &str = "Network connection failed. Please check your internet connection.";
const MSG_ACCESS: &str = "Access denied. Please check your permissions.";
const MSG_NOT_FOUND: &str = "The requested resource was not found.";
const MSG_RATE_LIMITED: &str = "Too many requests. Please wait a moment and try again.";
const MSG_SERVER: &str = "Server error. Please try again in a moment.";
const MSG_UNAVAILABLE: &str = "Service temporarily unavailable. Please try again later.";
const MSG_GENERIC: &str = "Something went wrong. Please try again.";

/// A failure as the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub status: u16,
    /// Short, human-readable; safe to show to end users.
    pub message: String,
    pub retriable: bool,
    /// Raw error text. Only exposed in development mode.
    #[serde(skip)]
    pub detail: String,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, message: impl Into<String>, retriable: bool, detail: String) -> Self {
        Self {
            kind,
            status: kind.status_code(),
            message: message.into(),
            retriable,
            detail,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::ClientClosedRequest
    }

    /// Carry the classification across into the framework error type,
    /// keeping the raw text as the (sanitizable) source.
    pub fn into_stash_error(self) -> StashError {
        StashError::new(self.kind, self.message).with_source(anyhow::Error::msg(self.detail))
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&BlobError> for ClassifiedError {
    fn from(err: &BlobError) -> Self {
        classify(err)
    }
}

impl From<BlobError> for StashError {
    fn from(err: BlobError) -> Self {
        classify(&err).into_stash_error()
    }
}

/// Classify a blob failure.
///
/// Domain errors keep their own message; transport and backend failures get
/// a generic user message and keep the raw text in `detail`.
pub fn classify(err: &BlobError) -> ClassifiedError {
    let detail = err.to_string();
    match err {
        BlobError::FileTooLarge { .. } => {
            ClassifiedError::new(ErrorKind::PayloadTooLarge, detail.clone(), false, detail)
        }
        BlobError::UnsupportedType { .. } => {
            ClassifiedError::new(ErrorKind::UnsupportedMediaType, detail.clone(), false, detail)
        }
        BlobError::BadRequest { .. } => {
            ClassifiedError::new(ErrorKind::BadRequest, detail.clone(), false, detail)
        }
        BlobError::AccessDenied { .. } => {
            ClassifiedError::new(ErrorKind::Forbidden, detail.clone(), false, detail)
        }
        BlobError::NotFound { .. } => {
            ClassifiedError::new(ErrorKind::NotFound, detail.clone(), false, detail)
        }
        BlobError::AlreadyExists { .. } => {
            ClassifiedError::new(ErrorKind::Conflict, detail.clone(), false, detail)
        }
        BlobError::Cancelled { .. } => {
            ClassifiedError::new(ErrorKind::ClientClosedRequest, detail.clone(), false, detail)
        }
        BlobError::Upstream { status, .. } => classify_status(*status, detail),
        BlobError::Network { .. } => {
            ClassifiedError::new(ErrorKind::Unavailable, MSG_NETWORK, true, detail)
        }
        BlobError::CircuitOpen => {
            ClassifiedError::new(ErrorKind::Unavailable, MSG_UNAVAILABLE, false, detail)
        }
        BlobError::Aggregate { .. } => {
            ClassifiedError::new(ErrorKind::GeneralError, detail.clone(), false, detail)
        }
        BlobError::Config { .. }
        | BlobError::Backend { .. }
        | BlobError::Io { .. }
        | BlobError::Serialization { .. } => {
            ClassifiedError::new(ErrorKind::GeneralError, MSG_GENERIC, false, detail)
        }
    }
}

fn classify_status(status: u16, detail: String) -> ClassifiedError {
    let kind = ErrorKind::from_status(status);
    let message = match kind {
        ErrorKind::NotAuthenticated | ErrorKind::Forbidden => MSG_ACCESS,
        ErrorKind::NotFound => MSG_NOT_FOUND,
        ErrorKind::TooManyRequests => MSG_RATE_LIMITED,
        ErrorKind::Timeout => MSG_NETWORK,
        _ if status >= 500 => MSG_SERVER,
        _ => MSG_GENERIC,
    };
    ClassifiedError::new(kind, message, kind.is_transient() || status >= 500, detail)
}
