//! [`TokenIssuer`] that talks to a remote `/api/upload` handshake route.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::issuer::{HandleUploadBody, HandleUploadResponse, TokenIssuer, TokenRequest, UploadCompletion};
use crate::retry::RetryPolicy;
use crate::{BlobError, BlobResult, UploadAuthorization};

/// Completion notifications are redelivered this many times.
pub const COMPLETION_REDELIVERIES: u32 = 5;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

const ACCESS_PREFIX: &str = "Blob access error: ";

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct HttpTokenIssuer {
    endpoint: String,
    client: reqwest::Client,
    redelivery: RetryPolicy,
}

impl HttpTokenIssuer {
    /// `endpoint` is the absolute URL of the handshake route.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            redelivery: RetryPolicy::default()
                .with_max_retries(COMPLETION_REDELIVERIES)
                .on_retry(|attempt, e| tracing::debug!(attempt, error = %e, "redelivering upload completion")),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Replace the HTTP client with one that gives up after `timeout`.
    pub fn with_timeout(self, timeout: Duration) -> BlobResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BlobError::backend)?;
        Ok(self.with_client(client))
    }

    pub fn with_redelivery(mut self, policy: RetryPolicy) -> Self {
        self.redelivery = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exchange(&self, url: &str, body: &HandleUploadBody) -> BlobResult<HandleUploadResponse> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<HandleUploadResponse>()
                .await
                .map_err(|e| BlobError::upstream(status.as_u16(), format!("invalid handshake response: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or_else(|_| {
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    text
                }
            });

        tracing::debug!(%url, status = status.as_u16(), error = %message, "handshake rejected");
        match status.as_u16() {
            400 | 401 | 403 => {
                let message = message.strip_prefix(ACCESS_PREFIX).unwrap_or(message.as_str());
                Err(BlobError::access_denied(message))
            }
            code => Err(BlobError::upstream(code, message)),
        }
    }
}

fn transport_error(e: reqwest::Error) -> BlobError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        BlobError::network(e.to_string())
    } else {
        BlobError::backend(e)
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, request: TokenRequest) -> BlobResult<UploadAuthorization> {
        let body = HandleUploadBody::GenerateClientToken((&request).into());
        match self.exchange(&self.endpoint, &body).await? {
            HandleUploadResponse::ClientToken(authorization) => Ok(authorization),
            HandleUploadResponse::UploadCompleted { .. } => Err(BlobError::upstream(
                502,
                "handshake answered a token request with a completion ack",
            )),
        }
    }

    async fn notify_completed(&self, completion: UploadCompletion) -> BlobResult<()> {
        let url = completion
            .callback_url
            .clone()
            .unwrap_or_else(|| self.endpoint.clone());
        let body = HandleUploadBody::UploadCompleted(completion);

        self.redelivery
            .retry(|| self.exchange(&url, &body))
            .await
            .map(|_| ())
            .inspect_err(|e| tracing::warn!(%url, error = %e, "giving up on upload completion"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let issuer = HttpTokenIssuer::new("http://127.0.0.1:9/api/upload");
        let err = issuer.issue(TokenRequest::new("a.png")).await.unwrap_err();
        assert!(matches!(err, BlobError::Network { .. }), "{err:?}");
        assert!(err.is_retriable());
    }

    #[test]
    fn default_timeout_builds() {
        let issuer = HttpTokenIssuer::new("http://localhost/api/upload")
            .with_timeout(DEFAULT_HANDSHAKE_TIMEOUT)
            .unwrap();
        assert_eq!(issuer.endpoint(), "http://localhost/api/upload");
    }
}
