//! In-process Blob Store API.
//!
//! Same policy as the S3-compatible store, kept in a sorted map. Used by the
//! test suites and by the server when `store.kind = memory`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;

use crate::store::{admit, collect_limited, resolve_pathname, BlobStore, PutRequest, DEFAULT_LIST_LIMIT};
use crate::types::pathname_from_url;
use crate::{
    BlobError, BlobResult, ByteStream, CopyOptions, ListMode, ListOptions, ListPage, StoredObjectDescriptor,
};

#[derive(Debug, Clone)]
struct StoredObject {
    descriptor: StoredObjectDescriptor,
    cache_control_max_age: u64,
    data: Bytes,
}

#[derive(Debug, Clone)]
pub struct MemoryBlobStore {
    public_base_url: String,
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Stored bytes for `pathname`, if any.
    pub fn bytes(&self, pathname: &str) -> Option<Bytes> {
        self.objects.read().get(pathname).map(|o| o.data.clone())
    }

    fn pathname<'a>(&self, url: &'a str) -> BlobResult<&'a str> {
        pathname_from_url(&self.public_base_url, url).ok_or_else(|| BlobError::not_found(url))
    }

    fn insert(&self, pathname: String, object: StoredObject, allow_overwrite: bool) -> BlobResult<()> {
        let mut objects = self.objects.write();
        if !allow_overwrite && objects.contains_key(&pathname) {
            return Err(BlobError::AlreadyExists { pathname });
        }
        objects.insert(pathname, object);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, request: PutRequest, body: ByteStream) -> BlobResult<StoredObjectDescriptor> {
        admit(&request, Utc::now())?;
        let auth = &request.authorization;
        let pathname = resolve_pathname(&auth.pathname, auth.add_random_suffix);

        if !auth.allow_overwrite && self.objects.read().contains_key(&pathname) {
            return Err(BlobError::AlreadyExists { pathname });
        }

        let data = collect_limited(body, auth.maximum_size_in_bytes).await?;
        let descriptor = StoredObjectDescriptor::new(
            &self.public_base_url,
            &pathname,
            &request.content_type,
            auth.cache_control_max_age,
            data.len() as u64,
            Utc::now(),
        );

        self.insert(
            pathname.clone(),
            StoredObject {
                descriptor: descriptor.clone(),
                cache_control_max_age: auth.cache_control_max_age,
                data,
            },
            auth.allow_overwrite,
        )?;

        tracing::debug!(pathname = %pathname, size = descriptor.size, "stored object in memory");
        Ok(descriptor)
    }

    async fn copy(
        &self,
        from_url: &str,
        to_pathname: &str,
        options: &CopyOptions,
    ) -> BlobResult<StoredObjectDescriptor> {
        let source = {
            let from = self.pathname(from_url)?;
            self.objects
                .read()
                .get(from)
                .cloned()
                .ok_or_else(|| BlobError::not_found(from))?
        };

        let pathname = resolve_pathname(to_pathname, options.add_random_suffix);
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| source.descriptor.content_type.clone());
        let max_age = options
            .cache_control_max_age
            .unwrap_or(source.cache_control_max_age);

        let descriptor = StoredObjectDescriptor::new(
            &self.public_base_url,
            &pathname,
            &content_type,
            max_age,
            source.data.len() as u64,
            Utc::now(),
        );

        self.insert(
            pathname,
            StoredObject {
                descriptor: descriptor.clone(),
                cache_control_max_age: max_age,
                data: source.data,
            },
            false,
        )?;
        Ok(descriptor)
    }

    async fn delete(&self, urls: &[String]) -> BlobResult<()> {
        let mut objects = self.objects.write();
        for url in urls {
            if let Some(pathname) = pathname_from_url(&self.public_base_url, url) {
                objects.remove(pathname);
            }
        }
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> BlobResult<ListPage> {
        let prefix = options.prefix.as_deref().unwrap_or("");
        let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
        let after = options.cursor.as_deref().map(decode_cursor).transpose()?;
        let folded = options.mode == ListMode::Folded;

        let objects = self.objects.read();
        let mut page = ListPage {
            folders: folded.then(Vec::new),
            ..ListPage::default()
        };
        let mut taken = 0;
        let mut last_key: Option<String> = None;

        for (key, object) in objects.iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(after) = after.as_deref() {
                if key.as_str() <= after || (after.ends_with('/') && key.starts_with(after)) {
                    continue;
                }
            }

            let folder = folded
                .then(|| key[prefix.len()..].find('/'))
                .flatten()
                .map(|i| &key[..prefix.len() + i + 1]);

            if let (Some(folder), Some(last)) = (folder, last_key.as_deref()) {
                if folder == last {
                    continue;
                }
            }

            if taken == limit {
                page.has_more = true;
                break;
            }
            taken += 1;

            match folder {
                Some(folder) => {
                    if let Some(folders) = page.folders.as_mut() {
                        folders.push(folder.to_string());
                    }
                    last_key = Some(folder.to_string());
                }
                None => {
                    page.blobs.push(object.descriptor.summary());
                    last_key = Some(key.clone());
                }
            }
        }

        if page.has_more {
            page.cursor = last_key.as_deref().map(encode_cursor);
        }
        Ok(page)
    }

    async fn head(&self, url: &str) -> BlobResult<StoredObjectDescriptor> {
        let pathname = self.pathname(url)?;
        self.objects
            .read()
            .get(pathname)
            .map(|o| o.descriptor.clone())
            .ok_or_else(|| BlobError::not_found(pathname))
    }

    fn public_base_url(&self) -> &str {
        &self.public_base_url
    }
}

fn encode_cursor(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

fn decode_cursor(cursor: &str) -> BlobResult<String> {
    URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| BlobError::bad_request("Invalid list cursor"))
}
