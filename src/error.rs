use std::fmt;

/// Application-level error for feed operations.
///
/// The variants mirror the failure taxonomy: a broken device channel is a
/// liveness signal (triggers session teardown, never retried), a store
/// failure is advisory (logged, swallowed), and an auth failure is surfaced
/// to the transport as a close before the session exists.
#[derive(Debug)]
pub enum FeedError {
    /// The device channel is broken or already closed.
    Channel(String),
    /// The external key-value store failed.
    Store(String),
    /// A connect token could not be resolved to a device.
    Auth(String),
}

impl FeedError {
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(msg) => write!(f, "channel error: {msg}"),
            Self::Store(msg) => write!(f, "store error: {msg}"),
            Self::Auth(msg) => write!(f, "auth error: {msg}"),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<redis::RedisError> for FeedError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}
