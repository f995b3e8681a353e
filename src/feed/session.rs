//! Per-device session state and the alert eligibility predicate.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::FeedError;
use crate::id;

use super::alert::ThreatAlert;
use super::channel::DeviceChannel;
use super::message::Envelope;

pub const DEFAULT_RISK_THRESHOLD: u8 = 50;

/// Delivery preferences for a session, mutated only by the session's own
/// inbound-frame handling. Held behind one mutex so a concurrent eligibility
/// check never sees a half-applied update.
#[derive(Debug, Clone)]
pub struct DeliveryFilters {
    /// Threat-type tags the device subscribed to.
    pub subscriptions: HashSet<String>,
    /// Minimum severity score to receive an alert (0-100).
    pub risk_threshold: u8,
    /// Region codes of interest.
    pub regions: Vec<String>,
}

impl DeliveryFilters {
    fn new(initial_subscriptions: Option<HashSet<String>>) -> Self {
        Self {
            subscriptions: initial_subscriptions.unwrap_or_else(default_subscriptions),
            risk_threshold: DEFAULT_RISK_THRESHOLD,
            regions: vec!["IN".to_string()],
        }
    }

    /// Subscriptions as a sorted list, for stable wire payloads.
    pub fn subscription_list(&self) -> Vec<String> {
        let mut list: Vec<String> = self.subscriptions.iter().cloned().collect();
        list.sort();
        list
    }
}

pub fn default_subscriptions() -> HashSet<String> {
    ["phishing", "malware", "scam"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// One authenticated device's live channel plus its filter preferences.
pub struct Session {
    /// Unique session identifier (`ses_` prefixed ULID), never reused.
    pub session_id: String,
    /// Stable device identifier supplied by the authenticator.
    pub device_id: String,
    /// Exclusively owned send half of the device's duplex channel.
    channel: Arc<dyn DeviceChannel>,
    pub connected_at: DateTime<Utc>,
    last_seen: Mutex<DateTime<Utc>>,
    filters: Mutex<DeliveryFilters>,
}

impl Session {
    pub fn new(
        device_id: &str,
        channel: Arc<dyn DeviceChannel>,
        initial_subscriptions: Option<HashSet<String>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: id::prefixed_ulid(id::prefix::SESSION),
            device_id: device_id.to_string(),
            channel,
            connected_at: now,
            last_seen: Mutex::new(now),
            filters: Mutex::new(DeliveryFilters::new(initial_subscriptions)),
        }
    }

    /// Record inbound activity. Called for every client frame.
    pub fn touch(&self) {
        *self.last_seen.lock() = Utc::now();
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.lock()
    }

    #[cfg(test)]
    pub fn set_last_seen(&self, at: DateTime<Utc>) {
        *self.last_seen.lock() = at;
    }

    pub fn filters(&self) -> DeliveryFilters {
        self.filters.lock().clone()
    }

    /// Union the given threat types into the subscription set and optionally
    /// replace the risk threshold. Returns the resulting effective filters.
    pub fn apply_subscribe(
        &self,
        threat_types: &[String],
        risk_threshold: Option<u8>,
    ) -> DeliveryFilters {
        let mut filters = self.filters.lock();
        filters
            .subscriptions
            .extend(threat_types.iter().cloned());
        if let Some(threshold) = risk_threshold {
            filters.risk_threshold = threshold.min(100);
        }
        filters.clone()
    }

    /// Remove the given threat types from the subscription set.
    pub fn apply_unsubscribe(&self, threat_types: &[String]) {
        let mut filters = self.filters.lock();
        for threat_type in threat_types {
            filters.subscriptions.remove(threat_type);
        }
    }

    /// The eligibility predicate: subscription match, severity threshold,
    /// and region intersection (either side empty passes the region check).
    pub fn wants_alert(&self, alert: &ThreatAlert) -> bool {
        let filters = self.filters.lock();

        let subscribed = filters.subscriptions.contains(alert.alert_type.as_str())
            || alert
                .threat_tags
                .iter()
                .any(|tag| filters.subscriptions.contains(tag));
        if !subscribed {
            return false;
        }

        if alert.severity.score() < filters.risk_threshold {
            return false;
        }

        if !alert.affected_regions.is_empty() && !filters.regions.is_empty() {
            let intersects = alert
                .affected_regions
                .iter()
                .any(|region| filters.regions.contains(region));
            if !intersects {
                return false;
            }
        }

        true
    }

    /// Stamp the envelope for this device, serialize, and send.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), FeedError> {
        let stamped = envelope.stamped(&self.device_id);
        let json = serde_json::to_string(&stamped)
            .map_err(|err| FeedError::channel(err.to_string()))?;
        self.channel.send_text(json).await
    }

    /// Close the channel, swallowing errors — a channel that is already
    /// broken must not block teardown.
    pub async fn close(&self) {
        if let Err(err) = self.channel.close().await {
            tracing::debug!(session_id = %self.session_id, %err, "error closing channel");
        }
    }
}
