//! Connect-token resolution at the transport boundary.
//!
//! Token issuance and validation belong to the external REST layer; the feed
//! core only needs an opaque token resolved to an already-trusted device id
//! before a session is registered.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FeedError;
use crate::id;
use crate::kv::KeyValueStore;

const TICKET_KEY_PREFIX: &str = "connect_ticket:";
const TICKET_TTL_SECS: u64 = 60;

/// Resolves an opaque connect token to a trusted device id.
#[async_trait]
pub trait DeviceAuthenticator: Send + Sync {
    async fn resolve_device(&self, token: &str) -> Result<String, FeedError>;
}

/// Single-use connect tickets held in the key-value store.
///
/// The REST layer mints a ticket when a device authenticates; the device
/// presents it on the WebSocket handshake and the ticket is consumed.
pub struct TicketAuthenticator {
    kv: Arc<dyn KeyValueStore>,
}

impl TicketAuthenticator {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Mint a short-lived, single-use connect ticket for a device.
    pub async fn mint_ticket(&self, device_id: &str) -> Result<String, FeedError> {
        let ticket = id::prefixed_ulid(id::prefix::TICKET);
        let key = format!("{TICKET_KEY_PREFIX}{ticket}");
        self.kv.set_ex(&key, device_id, TICKET_TTL_SECS).await?;
        Ok(ticket)
    }
}

#[async_trait]
impl DeviceAuthenticator for TicketAuthenticator {
    async fn resolve_device(&self, token: &str) -> Result<String, FeedError> {
        let key = format!("{TICKET_KEY_PREFIX}{token}");
        let device_id = self
            .kv
            .get(&key)
            .await?
            .ok_or_else(|| FeedError::auth("invalid or expired connect ticket"))?;
        // Single use: failure to delete only widens the ticket window.
        if let Err(err) = self.kv.del(&key).await {
            tracing::warn!(%err, "failed to consume connect ticket");
        }
        Ok(device_id)
    }
}
