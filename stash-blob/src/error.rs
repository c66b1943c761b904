use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

const MIB: f64 = 1024.0 * 1024.0;

/// Errors that can occur during blob operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error(
        "File size {:.2}MB exceeds maximum allowed size of {:.2}MB",
        *size as f64 / MIB,
        *limit as f64 / MIB
    )]
    FileTooLarge { size: u64, limit: u64 },

    #[error("File type \"{content_type}\" is not allowed. Allowed types: {}", allowed.join(", "))]
    UnsupportedType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("Blob access error: {message}")]
    AccessDenied { message: String },

    #[error("Blob not found")]
    NotFound { pathname: String },

    #[error("This blob already exists: {pathname}")]
    AlreadyExists { pathname: String },

    #[error("{operation} operation was cancelled")]
    Cancelled { operation: String },

    /// Upstream answered with a status that says "try again later".
    #[error("Blob store request failed with status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Some uploads failed:\n{}", render_failures(failures))]
    Aggregate { failures: Vec<FileFailure> },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

/// One failed file of a multi-file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub file_name: String,
    pub reason: String,
}

fn render_failures(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.file_name, f.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

impl BlobError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create a bad request error
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create an access denied error
    pub fn access_denied<S: Into<String>>(message: S) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(pathname: S) -> Self {
        Self::NotFound {
            pathname: pathname.into(),
        }
    }

    /// Create a cancellation error for the named operation ("Copy", "Upload", ...)
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an upstream status error
    pub fn upstream<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the failure may succeed if the same call is repeated.
    pub fn is_retriable(&self) -> bool {
        crate::classify::classify(self).retriable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_message_uses_two_decimal_megabytes() {
        let err = BlobError::FileTooLarge {
            size: 2 * 1024 * 1024,
            limit: 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "File size 2.00MB exceeds maximum allowed size of 1.00MB"
        );
    }

    #[test]
    fn type_message_lists_allowed_set() {
        let err = BlobError::UnsupportedType {
            content_type: "video/mp4".into(),
            allowed: vec!["image/*".into(), "application/pdf".into()],
        };
        assert_eq!(
            err.to_string(),
            "File type \"video/mp4\" is not allowed. Allowed types: image/*, application/pdf"
        );
    }

    #[test]
    fn aggregate_lists_one_line_per_failure() {
        let err = BlobError::Aggregate {
            failures: vec![
                FileFailure {
                    file_name: "a.png".into(),
                    reason: "boom".into(),
                },
                FileFailure {
                    file_name: "b.png".into(),
                    reason: "bang".into(),
                },
            ],
        };
        assert_eq!(err.to_string(), "Some uploads failed:\na.png: boom\nb.png: bang");
    }

    #[test]
    fn cancellation_names_the_operation() {
        assert_eq!(
            BlobError::cancelled("Copy").to_string(),
            "Copy operation was cancelled"
        );
    }
}
