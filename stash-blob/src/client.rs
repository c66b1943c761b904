//! Management operations: copy, delete, list and metadata.
//!
//! Each call runs under its own child cancellation token with a fixed
//! deadline; timing out reports the same way as an explicit cancel.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::{with_deadline, CancellationToken, MANAGEMENT_TIMEOUT};
use crate::store::BlobStore;
use crate::{BlobError, BlobResult, CopyOptions, ListOptions, ListPage, StoredObjectDescriptor};

/// What to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Url(String),
    Urls(Vec<String>),
}

impl DeleteTarget {
    /// From the `url` / `urls` query parameters. `urls` must be a JSON array
    /// of strings and wins when both are present.
    pub fn from_params(url: Option<&str>, urls: Option<&str>) -> BlobResult<Self> {
        match (url.filter(|u| !u.is_empty()), urls.filter(|u| !u.is_empty())) {
            (_, Some(raw)) => serde_json::from_str::<Vec<String>>(raw)
                .map(DeleteTarget::Urls)
                .map_err(|_| {
                    BlobError::bad_request("Invalid URLs format. Expected JSON array of strings.")
                }),
            (Some(url), None) => Ok(DeleteTarget::Url(url.to_string())),
            (None, None) => Err(BlobError::bad_request(
                "Missing required parameter: url or urls",
            )),
        }
    }

    fn urls(&self) -> &[String] {
        match self {
            DeleteTarget::Url(url) => std::slice::from_ref(url),
            DeleteTarget::Urls(urls) => urls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeleteOutcome {
    #[serde(rename_all = "camelCase")]
    Single { message: String, deleted_url: String },
    #[serde(rename_all = "camelCase")]
    Bulk { message: String, deleted_count: usize },
}

#[derive(Clone)]
pub struct BlobClient {
    store: Arc<dyn BlobStore>,
    timeout: Duration,
}

impl BlobClient {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            timeout: MANAGEMENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub async fn copy(
        &self,
        from_url: &str,
        to_pathname: &str,
        options: &CopyOptions,
        cancel: &CancellationToken,
    ) -> BlobResult<StoredObjectDescriptor> {
        if from_url.is_empty() || to_pathname.is_empty() {
            return Err(BlobError::bad_request(
                "Missing required parameters: fromUrl and toPathname are required",
            ));
        }

        let blob = with_deadline("Copy", self.timeout, cancel, |_| {
            self.store.copy(from_url, to_pathname, options)
        })
        .await?;
        tracing::info!(from = %from_url, to = %blob.pathname, "copied blob");
        Ok(blob)
    }

    pub async fn delete(&self, target: DeleteTarget, cancel: &CancellationToken) -> BlobResult<DeleteOutcome> {
        with_deadline("Delete", self.timeout, cancel, |_| self.store.delete(target.urls())).await?;

        let outcome = match target {
            DeleteTarget::Url(url) => DeleteOutcome::Single {
                message: "File deleted successfully".to_string(),
                deleted_url: url,
            },
            DeleteTarget::Urls(urls) => DeleteOutcome::Bulk {
                message: format!("Successfully deleted {} files", urls.len()),
                deleted_count: urls.len(),
            },
        };
        tracing::info!(?outcome, "deleted blobs");
        Ok(outcome)
    }

    pub async fn list(&self, options: &ListOptions, cancel: &CancellationToken) -> BlobResult<ListPage> {
        if options.limit == Some(0) {
            return Err(BlobError::bad_request("limit must be a positive integer"));
        }
        with_deadline("List", self.timeout, cancel, |_| self.store.list(options)).await
    }

    /// Follow cursors until the listing is exhausted. Each page gets its own
    /// deadline.
    pub async fn list_all(&self, options: ListOptions, cancel: &CancellationToken) -> BlobResult<ListPage> {
        let mut all = ListPage::default();
        let mut options = options;

        loop {
            let page = self.list(&options, cancel).await?;
            all.blobs.extend(page.blobs);
            if let Some(folders) = page.folders {
                let merged = all.folders.get_or_insert_with(Vec::new);
                for folder in folders {
                    if !merged.contains(&folder) {
                        merged.push(folder);
                    }
                }
            }

            match page.cursor {
                Some(cursor) if page.has_more && options.cursor.as_deref() != Some(cursor.as_str()) => {
                    options.cursor = Some(cursor);
                }
                _ => break,
            }
        }
        Ok(all)
    }

    /// Metadata for `url`.
    pub async fn head(&self, url: &str, cancel: &CancellationToken) -> BlobResult<StoredObjectDescriptor> {
        if url.is_empty() {
            return Err(BlobError::bad_request("Missing required parameter: url"));
        }
        with_deadline("Metadata", self.timeout, cancel, |_| self.store.head(url)).await
    }
}
