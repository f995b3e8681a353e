/// Feed service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Redis connection string for the metadata mirror and report queue.
    /// When unset, an in-memory store is used instead.
    pub redis_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
        }
    }
}
