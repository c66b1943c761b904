use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;

use crate::{BlobError, BlobResult};

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Fallback content type when nothing better is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Descriptor of an object that the store has durably written.
///
/// Only stores construct these, either in response to a write or a
/// metadata query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObjectDescriptor {
    pub url: String,
    pub download_url: String,
    pub pathname: String,
    pub content_type: String,
    pub content_disposition: String,
    pub cache_control: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl StoredObjectDescriptor {
    /// Build the descriptor for `pathname` as served from `public_base_url`.
    pub fn new(
        public_base_url: &str,
        pathname: &str,
        content_type: &str,
        cache_control_max_age: u64,
        size: u64,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        let url = public_url(public_base_url, pathname);
        Self {
            download_url: download_url(&url),
            url,
            pathname: pathname.to_string(),
            content_type: content_type.to_string(),
            content_disposition: format!("inline; filename=\"{}\"", file_name(pathname)),
            cache_control: format!("public, max-age={cache_control_max_age}"),
            size,
            uploaded_at,
        }
    }

    pub fn summary(&self) -> ObjectSummary {
        ObjectSummary {
            pathname: self.pathname.clone(),
            url: self.url.clone(),
            download_url: self.download_url.clone(),
            size: self.size,
            uploaded_at: self.uploaded_at,
        }
    }
}

/// Listing entry for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub pathname: String,
    pub url: String,
    pub download_url: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl ObjectSummary {
    pub fn new(public_base_url: &str, pathname: &str, size: u64, uploaded_at: DateTime<Utc>) -> Self {
        let url = public_url(public_base_url, pathname);
        Self {
            download_url: download_url(&url),
            url,
            pathname: pathname.to_string(),
            size,
            uploaded_at,
        }
    }
}

/// Short-lived, single-use grant to write one object directly to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAuthorization {
    pub pathname: String,
    pub allowed_content_types: Vec<String>,
    pub maximum_size_in_bytes: u64,
    pub add_random_suffix: bool,
    pub allow_overwrite: bool,
    pub cache_control_max_age: u64,
    /// Absolute expiry, milliseconds since the Unix epoch.
    pub valid_until: i64,
    /// Echoed back verbatim with the completion notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_payload: Option<String>,
    /// Absolute URL that receives the completion notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl UploadAuthorization {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() > self.valid_until
    }

    /// An empty allow-list permits every content type.
    pub fn allows_content_type(&self, content_type: &str) -> bool {
        self.allowed_content_types.is_empty()
            || matches_any(&self.allowed_content_types, content_type)
    }
}

/// How a listing groups keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMode {
    /// Flat list of every object under the prefix.
    #[default]
    Expanded,
    /// Objects directly under the prefix, deeper keys folded into folders.
    Folded,
}

impl FromStr for ListMode {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expanded" => Ok(ListMode::Expanded),
            "folded" => Ok(ListMode::Folded),
            other => Err(BlobError::bad_request(format!(
                "Invalid list mode \"{other}\". Expected \"expanded\" or \"folded\""
            ))),
        }
    }
}

/// Parameters for one page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub mode: ListMode,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_cursor<S: Into<String>>(mut self, cursor: S) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn folded(mut self) -> Self {
        self.mode = ListMode::Folded;
        self
    }
}

/// One page of a forward-only listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub blobs: Vec<ObjectSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub has_more: bool,
    /// Present only for folded listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<String>>,
}

/// Options for a server-side copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub content_type: Option<String>,
    pub add_random_suffix: bool,
    pub cache_control_max_age: Option<u64>,
}

impl CopyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_random_suffix(mut self) -> Self {
        self.add_random_suffix = true;
        self
    }

    pub fn with_cache_control_max_age(mut self, seconds: u64) -> Self {
        self.cache_control_max_age = Some(seconds);
        self
    }
}

/// A file handed to the upload operation.
pub struct FileSource {
    pub name: String,
    pub size: u64,
    /// MIME type as reported by the caller; may be empty.
    pub content_type: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: Option<i64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

impl FileSource {
    pub fn new<N: Into<String>, C: Into<String>>(
        name: N,
        size: u64,
        content_type: C,
        body: ByteStream,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            content_type: content_type.into(),
            last_modified: None,
            body,
        }
    }

    /// In-memory file; the body is yielded as a single chunk.
    pub fn from_bytes<N: Into<String>, C: Into<String>>(
        name: N,
        content_type: C,
        data: impl Into<Bytes>,
    ) -> Self {
        let data: Bytes = data.into();
        let size = data.len() as u64;
        let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(data) });
        Self::new(name, size, content_type, Box::pin(stream))
    }

    /// Open a file on disk, guessing its content type from the extension.
    pub async fn open(path: impl AsRef<Path>) -> BlobResult<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BlobError::bad_request(format!("Not a file: {}", path.display())))?;
        let last_modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis());

        let content_type = guess_content_type(&name).to_string();
        let body = tokio_util::io::ReaderStream::new(file);

        Ok(Self {
            name,
            size: metadata.len(),
            content_type,
            last_modified,
            body: Box::pin(body),
        })
    }

    pub fn with_last_modified(mut self, millis: i64) -> Self {
        self.last_modified = Some(millis);
        self
    }
}

/// Match a MIME type against one pattern: exact, or by prefix when the
/// pattern ends in `/*`.
pub fn mime_matches(pattern: &str, content_type: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('/') => content_type.starts_with(prefix),
        _ => pattern == content_type,
    }
}

pub fn matches_any(patterns: &[String], content_type: &str) -> bool {
    patterns.iter().any(|p| mime_matches(p, content_type))
}

/// Content type from a file extension, `application/octet-stream` if unknown.
pub fn guess_content_type(name: &str) -> &'static str {
    mime_guess::from_path(name).first_raw().unwrap_or(OCTET_STREAM)
}

/// Public URL of `pathname` under `base`.
pub fn public_url(base: &str, pathname: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), pathname.trim_start_matches('/'))
}

fn download_url(url: &str) -> String {
    if url.contains('?') {
        format!("{url}&download=1")
    } else {
        format!("{url}?download=1")
    }
}

/// Last path segment of a storage key.
pub fn file_name(pathname: &str) -> &str {
    pathname.rsplit('/').next().unwrap_or(pathname)
}

/// Storage key for a URL served from `base`, or `None` when the URL points
/// elsewhere. Query strings and fragments are ignored.
pub fn pathname_from_url<'a>(base: &str, url: &'a str) -> Option<&'a str> {
    let base = base.trim_end_matches('/');
    let rest = url.strip_prefix(base)?.strip_prefix('/')?;
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    let pathname = &rest[..end];
    (!pathname.is_empty()).then_some(pathname)
}
