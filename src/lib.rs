pub mod auth;
pub mod config;
pub mod error;
pub mod feed;
pub mod id;
pub mod kv;

use std::sync::Arc;

use auth::DeviceAuthenticator;
use config::Config;
use feed::Feed;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<Feed>,
    pub auth: Arc<dyn DeviceAuthenticator>,
    pub config: Arc<Config>,
}
