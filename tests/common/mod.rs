#![allow(dead_code)]

use std::sync::Arc;

use shieldfeed::feed::channel::InMemoryChannel;
use shieldfeed::feed::Feed;
use shieldfeed::kv::MemoryStore;

/// Build a feed core backed by an in-memory store.
pub fn test_feed() -> (Arc<Feed>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Arc::new(Feed::new(store.clone())), store)
}

/// Register a device over an in-memory channel. Returns the session id and
/// the channel so tests can inspect delivered envelopes.
pub async fn connect_device(feed: &Feed, device_id: &str) -> (String, Arc<InMemoryChannel>) {
    let channel = Arc::new(InMemoryChannel::new());
    let session_id = feed.register(device_id, channel.clone(), None).await;
    (session_id, channel)
}

/// Envelopes of a given message type delivered on the channel.
pub fn envelopes_of_type(channel: &InMemoryChannel, message_type: &str) -> Vec<serde_json::Value> {
    channel
        .sent_json()
        .into_iter()
        .filter(|envelope| envelope["message_type"] == message_type)
        .collect()
}
