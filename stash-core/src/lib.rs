//! stash-core: framework-agnostic core for stash.
//!
//! Holds the HTTP-flavoured error taxonomy shared by the blob library and the
//! axum boundary, and the string key/value configuration store.

pub mod config;
pub mod errors;

pub use config::{StashConfig, StashConfigSnapshot};
pub use errors::{ErrorKind, StashError};
