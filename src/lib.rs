pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod drive;
pub mod error;
pub mod providers;
pub mod store;

pub use config::Config;
pub use error::ProxyError;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub tokens: auth::TokenManager,
    pub drive: drive::DriveProxy,
    pub states: crypto::StateSigner,
}

pub type SharedState = Arc<AppState>;
