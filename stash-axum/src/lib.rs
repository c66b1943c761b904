//! stash-axum: HTTP boundary for stash.
//!
//! Exposes the token handshake and the management operations of
//! `stash-blob` as routes under `/api`, plus the `stash-server` binary.

pub mod app;
pub mod form;
pub mod routes;
mod error;
mod state;

pub use app::{build, StashApp};
pub use error::ApiError;
pub use form::FormFields;
pub use state::StashState;
