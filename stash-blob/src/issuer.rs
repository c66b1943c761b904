//! Server-side token issuance and the JSON handshake around it.
//!
//! A [`TokenIssuer`] turns "I want to write `pathname`" into a short-lived
//! [`UploadAuthorization`], and later hears back once the write landed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::{ClientPayload, TokenPayload};
use crate::{BlobError, BlobResult, StoredObjectDescriptor, UploadAuthorization};

/// Upper bound for a single object unless the client payload asks otherwise.
pub const DEFAULT_MAXIMUM_SIZE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_VALIDITY_MINUTES: u64 = 60;
pub const DEFAULT_CACHE_CONTROL_MAX_AGE: u64 = 60 * 60 * 24 * 30;
/// Longest validity a client payload can ask for (one year).
pub const MAX_VALIDITY_MINUTES: u64 = 60 * 24 * 365;

/// Content types every authorization admits.
pub const DEFAULT_ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "video/mp4",
    "video/webm",
    "application/pdf",
    "text/plain",
    "text/csv",
    "application/json",
];

/// Request for an upload authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequest {
    pub pathname: String,
    /// Opaque JSON string from the client, see [`ClientPayload`].
    pub client_payload: Option<String>,
    pub multipart: bool,
    /// Where the client would like the completion notification delivered.
    pub callback_url: Option<String>,
}

impl TokenRequest {
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            ..Self::default()
        }
    }

    pub fn with_client_payload(mut self, payload: impl Into<String>) -> Self {
        self.client_payload = Some(payload.into());
        self
    }

    pub fn with_multipart(mut self, multipart: bool) -> Self {
        self.multipart = multipart;
        self
    }
}

/// Notification that an authorized write completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletion {
    pub blob: StoredObjectDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_payload: Option<String>,
    /// Delivery target taken from the authorization; not sent on the wire.
    #[serde(skip)]
    pub callback_url: Option<String>,
}

#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, request: TokenRequest) -> BlobResult<UploadAuthorization>;

    /// Errors are returned to the deliverer so it can redeliver.
    async fn notify_completed(&self, completion: UploadCompletion) -> BlobResult<()>;
}

/// Decides whether the caller may upload at all, and who they are.
#[async_trait]
pub trait UploadAuthorizer: Send + Sync {
    async fn authorize(&self, request: &TokenRequest) -> BlobResult<String>;
}

/// Lets everybody in as `"anonymous"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousAuthorizer;

#[async_trait]
impl UploadAuthorizer for AnonymousAuthorizer {
    async fn authorize(&self, _request: &TokenRequest) -> BlobResult<String> {
        Ok("anonymous".to_string())
    }
}

/// Application post-processing once an upload is durable.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_upload_completed(
        &self,
        blob: &StoredObjectDescriptor,
        token_payload: Option<&TokenPayload>,
    ) -> BlobResult<()>;
}

/// Records the completion in the log and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCompletion;

#[async_trait]
impl CompletionHandler for LogCompletion {
    async fn on_upload_completed(
        &self,
        blob: &StoredObjectDescriptor,
        token_payload: Option<&TokenPayload>,
    ) -> BlobResult<()> {
        tracing::info!(
            pathname = %blob.pathname,
            size = blob.size,
            uploaded_by = token_payload.map(|t| t.uploaded_by.as_str()).unwrap_or("unknown"),
            "blob upload completed"
        );
        Ok(())
    }
}

/// Server defaults applied to every authorization.
#[derive(Debug, Clone)]
pub struct IssuerPolicy {
    pub allowed_content_types: Vec<String>,
    pub maximum_size_in_bytes: u64,
    pub validity_minutes: u64,
    pub cache_control_max_age: u64,
    pub add_random_suffix: bool,
    pub allow_overwrite: bool,
    /// Absolute completion URL; wins over one suggested by the client.
    pub callback_url: Option<String>,
}

impl Default for IssuerPolicy {
    fn default() -> Self {
        Self {
            allowed_content_types: DEFAULT_ALLOWED_CONTENT_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            maximum_size_in_bytes: DEFAULT_MAXIMUM_SIZE_BYTES,
            validity_minutes: DEFAULT_VALIDITY_MINUTES,
            cache_control_max_age: DEFAULT_CACHE_CONTROL_MAX_AGE,
            add_random_suffix: true,
            allow_overwrite: false,
            callback_url: None,
        }
    }
}

/// Issues authorizations from an [`IssuerPolicy`] refined by the client
/// payload.
#[derive(Clone)]
pub struct PolicyTokenIssuer {
    policy: IssuerPolicy,
    authorizer: Arc<dyn UploadAuthorizer>,
    completion: Arc<dyn CompletionHandler>,
}

impl Default for PolicyTokenIssuer {
    fn default() -> Self {
        Self::new(IssuerPolicy::default())
    }
}

impl PolicyTokenIssuer {
    pub fn new(policy: IssuerPolicy) -> Self {
        Self {
            policy,
            authorizer: Arc::new(AnonymousAuthorizer),
            completion: Arc::new(LogCompletion),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn UploadAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_completion_handler(mut self, completion: Arc<dyn CompletionHandler>) -> Self {
        self.completion = completion;
        self
    }

    /// Completion URL for a server reachable at `base_url`.
    pub fn with_callback_base(mut self, base_url: &str) -> Self {
        self.policy.callback_url = Some(format!("{}/api/upload", base_url.trim_end_matches('/')));
        self
    }

    pub fn policy(&self) -> &IssuerPolicy {
        &self.policy
    }
}

#[async_trait]
impl TokenIssuer for PolicyTokenIssuer {
    async fn issue(&self, request: TokenRequest) -> BlobResult<UploadAuthorization> {
        if request.pathname.trim().is_empty() {
            return Err(BlobError::access_denied("A pathname is required"));
        }

        let identity = self.authorizer.authorize(&request).await?;
        let payload = match request.client_payload.as_deref() {
            Some(raw) if !raw.trim().is_empty() => ClientPayload::parse(raw)?,
            _ => ClientPayload::default(),
        };

        let policy = &self.policy;
        let mut allowed = policy.allowed_content_types.clone();
        allowed.extend(payload.additional_types.iter().flatten().cloned());

        let validity = payload
            .validity_minutes
            .filter(|m| *m > 0)
            .unwrap_or(policy.validity_minutes)
            .min(MAX_VALIDITY_MINUTES);
        let valid_until = Utc::now() + Duration::minutes(validity as i64);

        let authorization = UploadAuthorization {
            pathname: request.pathname.clone(),
            allowed_content_types: allowed,
            maximum_size_in_bytes: payload
                .max_size
                .filter(|s| *s > 0)
                .unwrap_or(policy.maximum_size_in_bytes),
            add_random_suffix: payload.add_random_suffix.unwrap_or(policy.add_random_suffix),
            allow_overwrite: payload.allow_overwrite.unwrap_or(policy.allow_overwrite),
            cache_control_max_age: payload
                .cache_control_max_age
                .filter(|s| *s > 0)
                .unwrap_or(policy.cache_control_max_age),
            valid_until: valid_until.timestamp_millis(),
            token_payload: Some(TokenPayload::new(identity.clone(), payload).to_json_string()?),
            callback_url: policy.callback_url.clone().or(request.callback_url),
        };

        tracing::info!(
            pathname = %authorization.pathname,
            multipart = request.multipart,
            identity = %identity,
            "issued upload authorization"
        );
        Ok(authorization)
    }

    async fn notify_completed(&self, completion: UploadCompletion) -> BlobResult<()> {
        let token_payload = completion
            .token_payload
            .as_deref()
            .map(TokenPayload::parse)
            .transpose()?;

        self.completion
            .on_upload_completed(&completion.blob, token_payload.as_ref())
            .await
            .inspect_err(|e| tracing::error!(pathname = %completion.blob.pathname, error = %e, "upload completion handler failed"))
    }
}

/// Body of a `generate-client-token` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateClientTokenPayload {
    pub pathname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_payload: Option<String>,
    #[serde(default)]
    pub multipart: bool,
}

impl From<GenerateClientTokenPayload> for TokenRequest {
    fn from(p: GenerateClientTokenPayload) -> Self {
        Self {
            pathname: p.pathname,
            client_payload: p.client_payload,
            multipart: p.multipart,
            callback_url: p.callback_url,
        }
    }
}

impl From<&TokenRequest> for GenerateClientTokenPayload {
    fn from(r: &TokenRequest) -> Self {
        Self {
            pathname: r.pathname.clone(),
            callback_url: r.callback_url.clone(),
            client_payload: r.client_payload.clone(),
            multipart: r.multipart,
        }
    }
}

/// Incoming handshake envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HandleUploadBody {
    #[serde(rename = "blob.generate-client-token")]
    GenerateClientToken(GenerateClientTokenPayload),
    #[serde(rename = "blob.upload-completed")]
    UploadCompleted(UploadCompletion),
}

/// Outgoing handshake envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandleUploadResponse {
    #[serde(rename = "blob.generate-client-token")]
    ClientToken(UploadAuthorization),
    #[serde(rename = "blob.upload-completed")]
    UploadCompleted { response: String },
}

/// Dispatch one handshake envelope to `issuer`.
pub async fn handle_upload(
    issuer: &dyn TokenIssuer,
    body: HandleUploadBody,
) -> BlobResult<HandleUploadResponse> {
    match body {
        HandleUploadBody::GenerateClientToken(payload) => issuer
            .issue(payload.into())
            .await
            .map(HandleUploadResponse::ClientToken),
        HandleUploadBody::UploadCompleted(completion) => {
            issuer.notify_completed(completion).await?;
            Ok(HandleUploadResponse::UploadCompleted {
                response: "ok".to_string(),
            })
        }
    }
}
