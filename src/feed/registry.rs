//! Registry of live device sessions with a best-effort metadata mirror.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::FeedError;
use crate::kv::KeyValueStore;

use super::channel::DeviceChannel;
use super::message::Envelope;
use super::session::Session;

/// TTL on mirrored session metadata: a liveness hint, not state.
const MIRROR_TTL_SECS: u64 = 3600;
const MIRROR_KEY_PREFIX: &str = "ws_connection:";

/// Sessions with no inbound activity for longer than this count as stale.
pub const STALE_AFTER_SECS: i64 = 300;

#[derive(Debug, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub subscription_counts: HashMap<String, usize>,
    pub stale_connections: usize,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    by_device: HashMap<String, String>,
}

/// Owns the live session set, keyed by session id and by device id.
///
/// Both indexes live under one `RwLock` so readers always observe them as a
/// consistent pair. Register/unregister sequences span suspension points
/// (channel close, welcome send), so they are additionally serialized by an
/// async mutation guard; this is what makes a register racing an unregister
/// for the same device resolve to newest-registration-wins.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    mutation: tokio::sync::Mutex<()>,
    store: Arc<dyn KeyValueStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            mutation: tokio::sync::Mutex::new(()),
            store,
        }
    }

    /// Register a session for an authenticated device.
    ///
    /// At most one live session exists per device: an existing session for
    /// this device is fully torn down first (last writer wins). Sends the
    /// `connection_established` envelope and mirrors session metadata to the
    /// external store.
    pub async fn register(
        &self,
        device_id: &str,
        channel: Arc<dyn DeviceChannel>,
        initial_subscriptions: Option<HashSet<String>>,
    ) -> String {
        let _guard = self.mutation.lock().await;

        let prior = self.inner.read().by_device.get(device_id).cloned();
        if let Some(prior_id) = prior {
            tracing::info!(device_id, session_id = %prior_id, "replacing existing device session");
            self.remove_session(&prior_id).await;
        }

        let session = Arc::new(Session::new(device_id, channel, initial_subscriptions));
        let session_id = session.session_id.clone();
        {
            let mut inner = self.inner.write();
            inner
                .sessions
                .insert(session_id.clone(), session.clone());
            inner
                .by_device
                .insert(device_id.to_string(), session_id.clone());
        }

        let filters = session.filters();
        let welcome =
            Envelope::connection_established(&session_id, filters.subscription_list());
        if let Err(err) = session.send(&welcome).await {
            // Dead on arrival; the heartbeat pass will reap it.
            tracing::warn!(%session_id, device_id, %err, "failed to send welcome envelope");
        }

        if let Err(err) = self.mirror_session(&session).await {
            tracing::warn!(%session_id, %err, "failed to mirror session metadata");
        }

        tracing::info!(%session_id, device_id, "device session registered");
        session_id
    }

    /// Tear down a session. Idempotent: a no-op if the session is gone.
    pub async fn unregister(&self, session_id: &str) {
        let _guard = self.mutation.lock().await;
        self.remove_session(session_id).await;
    }

    /// Tear down whatever session the device currently has, if any.
    pub async fn unregister_device(&self, device_id: &str) {
        let _guard = self.mutation.lock().await;
        let session_id = self.inner.read().by_device.get(device_id).cloned();
        if let Some(session_id) = session_id {
            self.remove_session(&session_id).await;
        }
    }

    /// Removes both index entries as one atomic step, then closes the
    /// channel and deletes the mirror entry. Caller holds the mutation guard.
    async fn remove_session(&self, session_id: &str) {
        let session = {
            let mut inner = self.inner.write();
            let Some(session) = inner.sessions.remove(session_id) else {
                return;
            };
            let mapped = inner.by_device.get(session.device_id.as_str());
            debug_assert_eq!(mapped, Some(&session.session_id));
            inner.by_device.remove(session.device_id.as_str());
            session
        };

        session.close().await;

        let key = mirror_key(session_id);
        if let Err(err) = self.store.del(&key).await {
            tracing::warn!(%session_id, %err, "failed to delete mirrored session metadata");
        }

        tracing::info!(%session_id, device_id = %session.device_id, "device session removed");
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.read().sessions.get(session_id).cloned()
    }

    pub fn lookup_by_device(&self, device_id: &str) -> Option<Arc<Session>> {
        let inner = self.inner.read();
        let session_id = inner.by_device.get(device_id)?;
        inner.sessions.get(session_id).cloned()
    }

    /// A point-in-time copy of the live session set, so callers can iterate
    /// and send without holding the registry lock.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner.read().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    pub fn snapshot_stats(&self) -> RegistryStats {
        let sessions = self.snapshot();
        let now = Utc::now();

        let mut subscription_counts: HashMap<String, usize> = HashMap::new();
        let mut stale_connections = 0;
        for session in &sessions {
            for subscription in session.filters().subscriptions {
                *subscription_counts.entry(subscription).or_insert(0) += 1;
            }
            if (now - session.last_seen()).num_seconds() > STALE_AFTER_SECS {
                stale_connections += 1;
            }
        }

        RegistryStats {
            total_connections: sessions.len(),
            subscription_counts,
            stale_connections,
        }
    }

    async fn mirror_session(&self, session: &Session) -> Result<(), FeedError> {
        let filters = session.filters();
        let value = serde_json::to_string(&serde_json::json!({
            "device_id": session.device_id,
            "connected_at": session.connected_at,
            "subscriptions": filters.subscription_list(),
        }))
        .map_err(|err| FeedError::store(err.to_string()))?;
        self.store
            .set_ex(&mirror_key(&session.session_id), &value, MIRROR_TTL_SECS)
            .await
    }
}

fn mirror_key(session_id: &str) -> String {
    format!("{MIRROR_KEY_PREFIX}{session_id}")
}
