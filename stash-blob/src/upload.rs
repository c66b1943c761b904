use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Map, Value};

use crate::cancel::{cancellable, CancellationToken};
use crate::classify::classify;
use crate::error::FileFailure;
use crate::issuer::{TokenIssuer, TokenRequest, UploadCompletion};
use crate::payload::{ClientPayload, PayloadLayers};
use crate::state::{TransferEvent, TransferTracker};
use crate::store::{BlobStore, PutRequest};
use crate::types::{guess_content_type, matches_any, OCTET_STREAM};
use crate::{BlobError, BlobResult, ByteStream, FileSource, StoredObjectDescriptor};

/// Files strictly larger than this go multipart unless told otherwise.
pub const MULTIPART_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

const OPERATION: &str = "Upload";

/// Single-shot or multipart transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MultipartMode {
    /// Multipart iff the file exceeds [`MULTIPART_THRESHOLD_BYTES`].
    #[default]
    Auto,
    Always,
    Never,
}

impl MultipartMode {
    pub fn resolve(self, size: u64) -> bool {
        match self {
            MultipartMode::Auto => size > MULTIPART_THRESHOLD_BYTES,
            MultipartMode::Always => true,
            MultipartMode::Never => false,
        }
    }
}

impl From<bool> for MultipartMode {
    fn from(multipart: bool) -> Self {
        if multipart {
            MultipartMode::Always
        } else {
            MultipartMode::Never
        }
    }
}

/// Caller-side policy for one upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub max_size: Option<u64>,
    /// MIME patterns; `type/*` matches by prefix. Empty admits everything.
    pub allowed_types: Vec<String>,
    pub add_random_suffix: Option<bool>,
    pub allow_overwrite: Option<bool>,
    pub cache_control_max_age: Option<u64>,
    pub validity_minutes: Option<u64>,
    pub multipart: MultipartMode,
    pub folder_path: Option<String>,
    pub client_payload: Option<Map<String, Value>>,
    pub content_type: Option<String>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn with_allowed_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_random_suffix(mut self, enabled: bool) -> Self {
        self.add_random_suffix = Some(enabled);
        self
    }

    pub fn with_overwrite(mut self, enabled: bool) -> Self {
        self.allow_overwrite = Some(enabled);
        self
    }

    pub fn with_cache_control_max_age(mut self, seconds: u64) -> Self {
        self.cache_control_max_age = Some(seconds);
        self
    }

    pub fn with_validity_minutes(mut self, minutes: u64) -> Self {
        self.validity_minutes = Some(minutes);
        self
    }

    pub fn with_multipart(mut self, mode: impl Into<MultipartMode>) -> Self {
        self.multipart = mode.into();
        self
    }

    pub fn with_folder<S: Into<String>>(mut self, folder: S) -> Self {
        self.folder_path = Some(folder.into());
        self
    }

    pub fn with_client_payload(mut self, payload: Map<String, Value>) -> Self {
        self.client_payload = Some(payload);
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Pre-flight checks. Size first, then type.
    pub fn validate(&self, file: &FileSource) -> BlobResult<()> {
        if let Some(limit) = self.max_size {
            if file.size > limit {
                return Err(BlobError::FileTooLarge {
                    size: file.size,
                    limit,
                });
            }
        }

        if !self.allowed_types.is_empty() && !matches_any(&self.allowed_types, &file.content_type) {
            return Err(BlobError::UnsupportedType {
                content_type: file.content_type.clone(),
                allowed: self.allowed_types.clone(),
            });
        }
        Ok(())
    }

    /// `folder/name`, or just `name` without a folder.
    pub fn storage_key(&self, name: &str) -> String {
        match self.folder_path.as_deref().map(|f| f.trim_end_matches('/')) {
            Some(folder) if !folder.is_empty() => format!("{folder}/{name}"),
            _ => name.to_string(),
        }
    }

    /// Explicit override, then the file's own type, then a guess from the
    /// name.
    pub fn content_type_for(&self, file: &FileSource) -> String {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .or_else(|| Some(file.content_type.as_str()).filter(|ct| !ct.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(&file.name).to_string())
    }

    fn client_payload_for(&self, file: &FileSource) -> BlobResult<String> {
        ClientPayload::merge(PayloadLayers {
            original_name: &file.name,
            size: file.size,
            content_type: &file.content_type,
            last_modified: file.last_modified,
            caller: self.client_payload.as_ref(),
            max_size: self.max_size,
            additional_types: Some(self.allowed_types.as_slice()),
            add_random_suffix: self.add_random_suffix,
            allow_overwrite: self.allow_overwrite,
            cache_control_max_age: self.cache_control_max_age,
            validity_minutes: self.validity_minutes,
        })?
        .to_json_string()
    }
}

/// Client-side upload operation: validate, authorize, stream, notify.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn BlobStore>,
    issuer: Arc<dyn TokenIssuer>,
}

impl Uploader {
    pub fn new(store: Arc<dyn BlobStore>, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { store, issuer }
    }

    /// Upload one file, driving `tracker` through its lifecycle.
    ///
    /// Makes exactly one authorization request and one streaming attempt.
    /// No wrapper timeout applies; the authorization's expiry bounds it.
    pub async fn upload(
        &self,
        file: FileSource,
        options: &UploadOptions,
        tracker: &TransferTracker,
        cancel: &CancellationToken,
    ) -> BlobResult<StoredObjectDescriptor> {
        tracker.apply(TransferEvent::Start);
        let name = file.name.clone();
        let result = self.run(file, options, tracker, cancel).await;
        tracker.finish(&result);

        match &result {
            Ok(d) => tracing::info!(file = %name, pathname = %d.pathname, size = d.size, "upload succeeded"),
            Err(e) if e.is_cancelled() => tracing::info!(file = %name, "upload cancelled"),
            Err(e) => tracing::warn!(file = %name, error = %e, "upload failed"),
        }
        result
    }

    async fn run(
        &self,
        file: FileSource,
        options: &UploadOptions,
        tracker: &TransferTracker,
        cancel: &CancellationToken,
    ) -> BlobResult<StoredObjectDescriptor> {
        options.validate(&file)?;

        let multipart = options.multipart.resolve(file.size);
        let request = TokenRequest {
            pathname: options.storage_key(&file.name),
            client_payload: Some(options.client_payload_for(&file)?),
            multipart,
            callback_url: None,
        };

        let authorization = cancellable(OPERATION, cancel, self.issuer.issue(request)).await?;
        tracker.apply(TransferEvent::Authorized { total: file.size });

        let put = PutRequest {
            content_type: options.content_type_for(&file),
            size: file.size,
            multipart,
            authorization,
        };
        let token_payload = put.authorization.token_payload.clone();
        let callback_url = put.authorization.callback_url.clone();
        let body = track_progress(file.body, tracker.clone());
        let descriptor = cancellable(OPERATION, cancel, self.store.put(put, body)).await?;

        let completion = UploadCompletion {
            blob: descriptor.clone(),
            token_payload,
            callback_url,
        };
        if let Err(e) = self.issuer.notify_completed(completion).await {
            tracing::warn!(pathname = %descriptor.pathname, error = %e, "completion notification failed");
        }
        Ok(descriptor)
    }

    /// Upload `files` one after another.
    ///
    /// A failing file does not stop the queue; `on_uploaded` sees every
    /// success as it happens. Cancelling `cancel` stops the queue and fails
    /// the whole batch as cancelled.
    pub async fn upload_many<F>(
        &self,
        files: Vec<FileSource>,
        options: &UploadOptions,
        tracker: &TransferTracker,
        cancel: &CancellationToken,
        mut on_uploaded: F,
    ) -> BlobResult<Vec<StoredObjectDescriptor>>
    where
        F: FnMut(&StoredObjectDescriptor),
    {
        let mut uploaded = Vec::with_capacity(files.len());
        let mut failures = Vec::new();

        for file in files {
            if cancel.is_cancelled() {
                return Err(BlobError::cancelled(OPERATION));
            }

            let file_name = file.name.clone();
            match self.upload(file, options, tracker, cancel).await {
                Ok(descriptor) => {
                    on_uploaded(&descriptor);
                    uploaded.push(descriptor);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => failures.push(FileFailure {
                    file_name,
                    reason: failure_reason(&e),
                }),
            }
        }

        if failures.is_empty() {
            return Ok(uploaded);
        }
        let err = BlobError::Aggregate { failures };
        tracker.apply(TransferEvent::BatchFailed(classify(&err)));
        Err(err)
    }
}

/// Per-file line of a batch failure. Backend internals stay behind the
/// generic message.
fn failure_reason(e: &BlobError) -> String {
    match e {
        BlobError::Config { .. } | BlobError::Backend { .. } | BlobError::Io { .. } | BlobError::Serialization { .. } => {
            classify(e).message
        }
        _ => e.to_string(),
    }
}

/// Report cumulative bytes to `tracker` as the store pulls the body.
fn track_progress(mut body: ByteStream, tracker: TransferTracker) -> ByteStream {
    Box::pin(async_stream::stream! {
        let mut loaded: u64 = 0;
        while let Some(chunk) = body.next().await {
            if let Ok(bytes) = &chunk {
                loaded += bytes.len() as u64;
                tracker.apply(TransferEvent::Progress { loaded });
            }
            yield chunk;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64, content_type: &str) -> FileSource {
        FileSource::new(
            name,
            size,
            content_type,
            Box::pin(futures::stream::empty::<std::io::Result<bytes::Bytes>>()),
        )
    }

    #[test]
    fn batch_reasons_keep_domain_messages() {
        assert_eq!(failure_reason(&BlobError::network("connection reset")), "Network error: connection reset");
        assert_eq!(
            failure_reason(&BlobError::upstream(503, "slow down")),
            "Blob store request failed with status 503: slow down"
        );
        assert_eq!(
            failure_reason(&BlobError::backend(std::io::Error::other("bucket policy xyz"))),
            classify(&BlobError::config("x")).message
        );
    }

    #[test]
    fn auto_multipart_threshold_is_strict() {
        assert!(MultipartMode::Auto.resolve(MULTIPART_THRESHOLD_BYTES + 1));
        assert!(!MultipartMode::Auto.resolve(MULTIPART_THRESHOLD_BYTES));
        assert!(!MultipartMode::from(false).resolve(u64::MAX));
        assert!(MultipartMode::from(true).resolve(0));
    }

    #[test]
    fn size_is_checked_before_type() {
        let options = UploadOptions::new()
            .with_max_size(1024 * 1024)
            .with_allowed_types(["image/*"]);
        let err = options.validate(&file("movie.mp4", 2 * 1024 * 1024, "video/mp4")).unwrap_err();
        assert!(matches!(err, BlobError::FileTooLarge { .. }));

        let err = options.validate(&file("movie.mp4", 10, "video/mp4")).unwrap_err();
        assert!(matches!(err, BlobError::UnsupportedType { .. }));

        assert!(options.validate(&file("cat.png", 10, "image/png")).is_ok());
    }

    #[test]
    fn storage_key_uses_folder() {
        let options = UploadOptions::new().with_folder("photos/");
        assert_eq!(options.storage_key("cat.png"), "photos/cat.png");
        assert_eq!(UploadOptions::new().storage_key("cat.png"), "cat.png");
    }

    #[test]
    fn content_type_negotiation() {
        let typed = file("a.bin", 1, "image/png");
        let untyped = file("notes.txt", 1, "");
        let unknown = file("blob", 1, "");

        assert_eq!(UploadOptions::new().with_content_type("text/csv").content_type_for(&typed), "text/csv");
        assert_eq!(UploadOptions::new().content_type_for(&typed), "image/png");
        assert_eq!(UploadOptions::new().content_type_for(&untyped), "text/plain");
        assert_eq!(UploadOptions::new().content_type_for(&unknown), OCTET_STREAM);
    }

    #[test]
    fn client_payload_carries_file_facts_and_options() {
        let options = UploadOptions::new().with_max_size(5).with_overwrite(true);
        let raw = options
            .client_payload_for(&file("a.png", 3, "image/png").with_last_modified(7))
            .unwrap();
        let payload = ClientPayload::parse(&raw).unwrap();
        assert_eq!(payload.original_name.as_deref(), Some("a.png"));
        assert_eq!(payload.last_modified, Some(7));
        assert_eq!(payload.max_size, Some(5));
        assert_eq!(payload.allow_overwrite, Some(true));
        assert_eq!(payload.additional_types, None);
    }
}
