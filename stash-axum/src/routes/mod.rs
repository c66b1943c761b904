pub mod manage;
pub mod upload;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::StashState;

/// Routes mounted under `/api`.
pub fn api_router(state: StashState) -> Router<()> {
    Router::new()
        .route("/upload", post(upload::handshake))
        .route("/copy", put(manage::copy))
        .route("/delete", delete(manage::delete))
        .route("/list", get(manage::list))
        .route("/metadata", get(manage::metadata))
        .with_state(state)
}
