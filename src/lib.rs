//! gauth: OAuth2 robot credentials for build workers.
//!
//! Re-exports modules needed by the CLI and the integration tests in `tests/`.

pub mod config;
pub mod credentials;
pub mod errors;
pub mod executor;
pub mod keys;
pub mod metadata;
pub mod migrate;
pub mod registry;
pub mod scope;
pub mod token;
