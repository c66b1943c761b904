use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::{
    BlobError, BlobResult, ByteStream, CopyOptions, ListOptions, ListPage, StoredObjectDescriptor,
    UploadAuthorization,
};

/// Default page size when a listing does not name one.
pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// Length of the random part appended to suffixed pathnames.
pub const RANDOM_SUFFIX_LEN: usize = 30;

/// Write of one object under a previously issued authorization.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub authorization: UploadAuthorization,
    pub content_type: String,
    /// Declared size of the body in bytes.
    pub size: u64,
    pub multipart: bool,
}

/// The Blob Store API: everything the upload and management operations
/// need from the external object store.
///
/// Implementations enforce the authorization on `put`; callers never see a
/// descriptor for an object that was not durably written.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream `body` into the store under `request.authorization`.
    async fn put(&self, request: PutRequest, body: ByteStream) -> BlobResult<StoredObjectDescriptor>;

    /// Server-side copy of the object at `from_url` to `to_pathname`.
    async fn copy(
        &self,
        from_url: &str,
        to_pathname: &str,
        options: &CopyOptions,
    ) -> BlobResult<StoredObjectDescriptor>;

    /// Delete objects by URL. Unknown URLs are ignored.
    async fn delete(&self, urls: &[String]) -> BlobResult<()>;

    /// One page of a forward-only listing.
    async fn list(&self, options: &ListOptions) -> BlobResult<ListPage>;

    /// Metadata for the object at `url`.
    async fn head(&self, url: &str) -> BlobResult<StoredObjectDescriptor>;

    /// Base that object URLs are served from.
    fn public_base_url(&self) -> &str;
}

/// Reject a write that the authorization does not cover.
pub fn admit(request: &PutRequest, now: DateTime<Utc>) -> BlobResult<()> {
    let auth = &request.authorization;

    if auth.is_expired_at(now) {
        return Err(BlobError::access_denied("Upload authorization has expired"));
    }
    if !auth.allows_content_type(&request.content_type) {
        return Err(BlobError::UnsupportedType {
            content_type: request.content_type.clone(),
            allowed: auth.allowed_content_types.clone(),
        });
    }
    if request.size > auth.maximum_size_in_bytes {
        return Err(BlobError::FileTooLarge {
            size: request.size,
            limit: auth.maximum_size_in_bytes,
        });
    }
    Ok(())
}

/// Final storage key for an authorized write.
pub fn resolve_pathname(pathname: &str, add_random_suffix: bool) -> String {
    if add_random_suffix {
        with_random_suffix(pathname)
    } else {
        pathname.to_string()
    }
}

/// `photos/cat.png` → `photos/cat-<random>.png`
pub fn with_random_suffix(pathname: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect();

    let (dir, name) = match pathname.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, pathname),
    };
    let file = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{suffix}.{ext}"),
        _ => format!("{name}-{suffix}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{file}"),
        None => file,
    }
}

/// Drain `body`, failing as soon as it grows past `limit` bytes.
pub async fn collect_limited(mut body: ByteStream, limit: u64) -> BlobResult<Bytes> {
    let mut data = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        data.extend_from_slice(&chunk);
        check_limit(data.len() as u64, limit)?;
    }
    Ok(data.freeze())
}

pub(crate) fn check_limit(size: u64, limit: u64) -> BlobResult<()> {
    if size > limit {
        return Err(BlobError::FileTooLarge { size, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(size: u64, content_type: &str, valid_until: i64) -> PutRequest {
        PutRequest {
            authorization: UploadAuthorization {
                pathname: "docs/a.pdf".into(),
                allowed_content_types: vec!["application/pdf".into(), "image/*".into()],
                maximum_size_in_bytes: 100,
                add_random_suffix: false,
                allow_overwrite: false,
                cache_control_max_age: 60,
                valid_until,
                token_payload: None,
                callback_url: None,
            },
            content_type: content_type.into(),
            size,
            multipart: false,
        }
    }

    #[test]
    fn admission_checks_expiry_type_and_size() {
        let now = Utc::now();
        let later = now.timestamp_millis() + 60_000;

        assert!(admit(&request(10, "image/png", later), now).is_ok());
        assert!(matches!(
            admit(&request(10, "image/png", now.timestamp_millis() - 1), now),
            Err(BlobError::AccessDenied { .. })
        ));
        assert!(matches!(
            admit(&request(10, "video/mp4", later), now),
            Err(BlobError::UnsupportedType { .. })
        ));
        assert!(matches!(
            admit(&request(101, "application/pdf", later), now),
            Err(BlobError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn random_suffix_keeps_folder_and_extension() {
        let key = with_random_suffix("photos/cat.png");
        assert!(key.starts_with("photos/cat-"));
        assert!(key.ends_with(".png"));
        assert_eq!(key.len(), "photos/cat-.png".len() + RANDOM_SUFFIX_LEN);

        let bare = with_random_suffix("README");
        assert!(bare.starts_with("README-"));
        assert_ne!(with_random_suffix("a.txt"), with_random_suffix("a.txt"));
    }

    #[tokio::test]
    async fn oversized_stream_is_cut_off() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"12345")), Ok(Bytes::from_static(b"6789"))];
        let body: ByteStream = Box::pin(futures::stream::iter(chunks));
        let err = collect_limited(body, 8).await.unwrap_err();
        assert!(matches!(err, BlobError::FileTooLarge { size: 9, limit: 8 }));
    }
}
