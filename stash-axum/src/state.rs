use std::sync::Arc;

use stash_blob::{BlobClient, BlobStore, TokenIssuer};
use stash_core::StashError;

use crate::ApiError;

/// Shared by every route.
#[derive(Clone)]
pub struct StashState {
    pub client: BlobClient,
    pub issuer: Arc<dyn TokenIssuer>,
    /// Attach raw error details to error bodies.
    pub development: bool,
}

impl StashState {
    pub fn new(store: Arc<dyn BlobStore>, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            client: BlobClient::new(store),
            issuer,
            development: false,
        }
    }

    pub fn with_client(mut self, client: BlobClient) -> Self {
        self.client = client;
        self
    }

    pub fn with_development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }

    pub fn error(&self, error: impl Into<StashError>) -> ApiError {
        ApiError::new(error.into()).with_details(self.development)
    }
}
