use std::sync::Arc;

use axum::handler::Handler;
use axum::http::HeaderName;
use axum::routing::get;
use axum::Router;
use stash_blob::{BlobStore, MemoryBlobStore, PolicyTokenIssuer, S3CompatibleStore, S3Config};
use stash_core::{StashConfig, StashConfigSnapshot};
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::StashState;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3030;
/// Served URLs for the in-memory store when none is configured.
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://127.0.0.1:3030/blobs";

const REQUEST_ID: &str = "x-request-id";

#[derive(Clone)]
pub struct StashApp {
    pub state: StashState,
    routes: Router<()>,
}

impl StashApp {
    pub fn new(state: StashState) -> Self {
        let routes = Router::new().nest("/api", routes::api_router(state.clone()));
        Self { state, routes }
    }

    pub fn use_router(mut self, path: &str, router: Router<()>) -> Self {
        self.routes = self.routes.nest(path, router);
        self
    }

    pub fn use_get<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()> + Clone + Send + 'static,
        T: 'static,
    {
        let router = Router::new().route("/", get(handler));
        self.use_router(path, router)
    }

    /// The full router with tracing and `x-request-id` handling applied.
    pub fn router(&self) -> Router<()> {
        let request_id = HeaderName::from_static(REQUEST_ID);
        self.routes.clone().layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
    }

    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "stash listening");
        self.serve(listener).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Assemble the application from configuration:
///
/// - `store.kind`: `memory` (default) or `s3`
/// - `store.public_base_url`: served URL base for stored objects
/// - `callback.base_url`: public base of this server, used for the
///   absolute completion URL
/// - `mode = development`: raw error details in error bodies
pub async fn build(config: &StashConfig) -> anyhow::Result<StashApp> {
    let snapshot = config.snapshot();
    let store = store_from_config(&snapshot).await?;

    let mut issuer = PolicyTokenIssuer::default();
    if let Some(base) = snapshot.get("callback.base_url").filter(|b| !b.is_empty()) {
        issuer = issuer.with_callback_base(base);
    }

    let state = StashState::new(store, Arc::new(issuer)).with_development(snapshot.is_development());
    Ok(StashApp::new(state).use_get("/health", || async { "ok" }))
}

async fn store_from_config(config: &StashConfigSnapshot) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.get("store.kind").unwrap_or("memory") {
        "memory" => {
            let base = config.get("store.public_base_url").unwrap_or(DEFAULT_PUBLIC_BASE_URL);
            tracing::info!(public_base_url = %base, "using in-memory blob store");
            Ok(Arc::new(MemoryBlobStore::new(base)))
        }
        "s3" => {
            let s3 = S3Config::from_config(config)?;
            tracing::info!(bucket = %s3.bucket, endpoint = ?s3.endpoint_url, "using S3-compatible blob store");
            Ok(Arc::new(S3CompatibleStore::new(s3).await))
        }
        other => anyhow::bail!("unknown store.kind {other:?}, expected \"memory\" or \"s3\""),
    }
}
