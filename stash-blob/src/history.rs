//! Client-side record of completed uploads.
//!
//! Completed descriptors live in a JSON key-value file under
//! [`HISTORY_KEY`]; other keys in the file are left alone. While an upload
//! runs, an optimistic entry stands in for it and is reconciled with the
//! authoritative descriptor once the upload resolves. Only completed uploads
//! are persisted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{BlobResult, FileSource, StoredObjectDescriptor};

pub const HISTORY_KEY: &str = "uploadedFiles";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Failed,
}

/// Placeholder shown for an upload that has not resolved yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticEntry {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub started_at: DateTime<Utc>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct UploadHistory {
    path: PathBuf,
    uploaded: Vec<StoredObjectDescriptor>,
    pending: Vec<OptimisticEntry>,
}

impl UploadHistory {
    /// An empty history backed by `path`; nothing is read.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            uploaded: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Read the history from `path`. A missing or unreadable file yields an
    /// empty history.
    pub async fn load(path: impl Into<PathBuf>) -> BlobResult<Self> {
        let mut history = Self::new(path);
        let mut store = read_store(&history.path).await?;
        if let Some(value) = store.remove(HISTORY_KEY) {
            match serde_json::from_value::<Vec<StoredObjectDescriptor>>(value) {
                Ok(uploaded) => history.uploaded = uploaded,
                Err(e) => {
                    tracing::warn!(path = %history.path.display(), error = %e, "discarding unreadable upload history")
                }
            }
        }
        Ok(history)
    }

    /// Write the completed uploads back, keeping unrelated keys.
    pub async fn save(&self) -> BlobResult<()> {
        let mut store = read_store(&self.path).await?;
        store.insert(HISTORY_KEY.to_string(), serde_json::to_value(&self.uploaded)?);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(store))?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), entries = self.uploaded.len(), "saved upload history");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Completed uploads, newest first.
    pub fn uploaded(&self) -> &[StoredObjectDescriptor] {
        &self.uploaded
    }

    pub fn pending(&self) -> &[OptimisticEntry] {
        &self.pending
    }

    /// Register an optimistic entry for `file` and return its client id.
    pub fn add_optimistic(&mut self, file: &FileSource) -> Uuid {
        let id = Uuid::new_v4();
        self.pending.push(OptimisticEntry {
            id,
            name: file.name.clone(),
            size: file.size,
            content_type: file.content_type.clone(),
            started_at: Utc::now(),
            status: EntryStatus::Pending,
            error: None,
        });
        id
    }

    /// Replace the optimistic entry `id` with the stored descriptor.
    /// Returns false when no such entry exists; the descriptor is recorded
    /// either way.
    pub fn reconcile(&mut self, id: Uuid, blob: StoredObjectDescriptor) -> bool {
        let before = self.pending.len();
        self.pending.retain(|entry| entry.id != id);
        self.uploaded.retain(|existing| existing.url != blob.url);
        self.uploaded.insert(0, blob);
        self.pending.len() != before
    }

    /// Mark the optimistic entry `id` as failed.
    pub fn fail(&mut self, id: Uuid, message: impl Into<String>) -> bool {
        match self.pending.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.status = EntryStatus::Failed;
                entry.error = Some(message.into());
                true
            }
            None => false,
        }
    }

    /// Drop an optimistic entry, e.g. after a cancelled upload.
    pub fn discard(&mut self, id: Uuid) -> bool {
        let before = self.pending.len();
        self.pending.retain(|entry| entry.id != id);
        self.pending.len() != before
    }

    /// Forget completed uploads whose URL is in `urls`.
    pub fn forget(&mut self, urls: &[String]) -> usize {
        let before = self.uploaded.len();
        self.uploaded.retain(|blob| !urls.contains(&blob.url));
        before - self.uploaded.len()
    }

    pub fn clear(&mut self) {
        self.uploaded.clear();
        self.pending.clear();
    }
}

async fn read_store(path: &Path) -> BlobResult<Map<String, Value>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "history file is not a JSON object, starting fresh");
            Ok(Map::new())
        }
    }
}
