//! # stash-blob: direct-to-store uploads
//!
//! `stash-blob` moves file bytes from a client straight into an object store.
//! A trusted server never sees the bytes; it only hands out short-lived
//! [`UploadAuthorization`]s that bound what the client may write.
//!
//! ## Key Features
//!
//! - **Pre-flight validation**: size and MIME checks fail before any request is made
//! - **Token handshake**: a JSON envelope protocol for issuing authorizations and acknowledging completions
//! - **Progress and cancellation**: monotonic byte progress, one cancellation token per operation
//! - **Management**: copy, delete (single or bulk), paginated listing and metadata, each with a deadline
//! - **Storage agnostic**: an S3-compatible store and an in-memory store behind one trait
//! - **Server agnostic**: no HTTP coupling; `stash-axum` puts routes in front of it
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use stash_blob::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let store = Arc::new(MemoryBlobStore::new("https://blob.example.com"));
//! let issuer = Arc::new(PolicyTokenIssuer::default());
//! let uploader = Uploader::new(store.clone(), issuer);
//!
//! let tracker = TransferTracker::new();
//! let cancel = CancellationToken::new();
//! let file = FileSource::from_bytes("hello.txt", "text/plain", "Hello, world!");
//!
//! let blob = uploader
//!     .upload(file, &UploadOptions::new().with_random_suffix(false), &tracker, &cancel)
//!     .await?;
//! assert_eq!(blob.pathname, "hello.txt");
//!
//! let client = BlobClient::new(store);
//! let meta = client.head(&blob.url, &CancellationToken::new()).await?;
//! assert_eq!(meta.size, 13);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Uploader / BlobClient    │  ← validation, progress, cancellation, deadlines
//! ├──────────────┬───────────┤
//! │ TokenIssuer  │ BlobStore │  ← authorization  /  storage primitives
//! └──────────────┴───────────┘
//! ```
//!
//! Failures are [`BlobError`]s; [`classify`] turns any of them into a user
//! message, a status and a retriable flag. [`RetryPolicy`] and
//! [`CircuitBreaker`] wrap calls that should tolerate transient failures.

pub mod cancel;
mod classify;
pub mod client;
mod error;
pub mod history;
pub mod issuer;
mod memory_store;
pub mod payload;
mod progress;
pub mod remote;
pub mod retry;
mod s3_store;
pub mod state;
pub mod store;
mod types;
pub mod upload;

pub use cancel::{cancellable, with_deadline, CancellationToken, MANAGEMENT_TIMEOUT};
pub use classify::{classify, ClassifiedError};
pub use client::{BlobClient, DeleteOutcome, DeleteTarget};
pub use error::{BlobError, BlobResult, FileFailure};
pub use history::{OptimisticEntry, UploadHistory, HISTORY_KEY};
pub use issuer::{
    handle_upload, HandleUploadBody, HandleUploadResponse, IssuerPolicy, PolicyTokenIssuer, TokenIssuer,
    TokenRequest, UploadCompletion,
};
pub use memory_store::MemoryBlobStore;
pub use payload::{ClientPayload, TokenPayload, PAYLOAD_VERSION};
pub use progress::{percentage, TransferProgress};
pub use remote::HttpTokenIssuer;
pub use retry::{CircuitBreaker, CircuitState, RetryPolicy};
pub use s3_store::{S3CompatibleStore, S3Config};
pub use state::{
    OperationEvent, OperationPhase, OperationState, OperationTracker, TransferEvent, TransferPhase, TransferState, TransferTracker,
};
pub use store::{BlobStore, PutRequest};
pub use types::{
    file_name, guess_content_type, matches_any, mime_matches, public_url, ByteStream, CopyOptions, FileSource,
    ListMode, ListOptions, ListPage, ObjectSummary, StoredObjectDescriptor, UploadAuthorization, OCTET_STREAM,
};
pub use upload::{MultipartMode, UploadOptions, Uploader, MULTIPART_THRESHOLD_BYTES};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobClient, BlobError, BlobResult, BlobStore, CancellationToken, FileSource, MemoryBlobStore,
        PolicyTokenIssuer, StoredObjectDescriptor, TokenIssuer, TransferTracker, UploadOptions, Uploader,
    };
}
