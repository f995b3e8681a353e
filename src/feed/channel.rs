//! Duplex transport seam between a session and its device.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::FeedError;

/// The send half of a device's duplex channel.
///
/// A [`Session`](super::session::Session) is the exclusive owner of its
/// channel: nothing else writes to or closes it. Backed by a WebSocket in
/// production and an in-memory buffer in tests.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), FeedError>;
    async fn close(&self) -> Result<(), FeedError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryChannel {
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail, simulating a dead transport.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Raw frames sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Sent frames parsed as JSON, in order.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }
}

#[async_trait]
impl DeviceChannel for InMemoryChannel {
    async fn send_text(&self, text: String) -> Result<(), FeedError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FeedError::channel("channel closed"));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedError::channel("simulated send failure"));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) -> Result<(), FeedError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
