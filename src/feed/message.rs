//! Outbound envelope and inbound client-frame wire formats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id;

use super::alert::{AlertSeverity, ThreatAlert};

// ---------------------------------------------------------------------------
// Server → Client envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ConnectionEstablished,
    ThreatAlert,
    SecurityUpdate,
    Pong,
    SubscriptionUpdated,
    ReportAcknowledged,
    ServerPing,
    SystemAnnouncement,
}

/// The standardized outbound message wrapper.
///
/// Constructed once per logical event; `device_id` is stamped per recipient
/// just before serialization (see [`Envelope::stamped`]).
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub message_id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub device_id: Option<String>,
}

impl Envelope {
    pub fn new(message_type: MessageType, data: Value) -> Self {
        Self {
            message_id: id::prefixed_ulid(id::prefix::MESSAGE),
            message_type,
            timestamp: Utc::now(),
            data,
            device_id: None,
        }
    }

    /// Clone with the destination device stamped in.
    pub fn stamped(&self, device_id: &str) -> Self {
        let mut envelope = self.clone();
        envelope.device_id = Some(device_id.to_string());
        envelope
    }

    /// Welcome message sent right after a session is registered.
    pub fn connection_established(session_id: &str, subscriptions: Vec<String>) -> Self {
        Self::new(
            MessageType::ConnectionEstablished,
            serde_json::json!({
                "session_id": session_id,
                "subscriptions": subscriptions,
                "server_time": Utc::now(),
            }),
        )
    }

    /// Threat alert payload with a coarse priority hint for the client UI.
    pub fn threat_alert(alert: &ThreatAlert) -> Self {
        let priority = if alert.severity >= AlertSeverity::High {
            "high"
        } else {
            "normal"
        };
        Self::new(
            MessageType::ThreatAlert,
            serde_json::json!({
                "alert": alert,
                "priority": priority,
            }),
        )
    }

    pub fn security_update(data: Value) -> Self {
        Self::new(MessageType::SecurityUpdate, data)
    }

    pub fn pong() -> Self {
        Self::new(
            MessageType::Pong,
            serde_json::json!({ "server_time": Utc::now() }),
        )
    }

    pub fn server_ping() -> Self {
        Self::new(
            MessageType::ServerPing,
            serde_json::json!({ "server_time": Utc::now() }),
        )
    }

    /// Acknowledges a subscribe frame with the resulting effective state.
    pub fn subscription_updated(subscriptions: Vec<String>, risk_threshold: u8) -> Self {
        Self::new(
            MessageType::SubscriptionUpdated,
            serde_json::json!({
                "subscriptions": subscriptions,
                "risk_threshold": risk_threshold,
            }),
        )
    }

    pub fn report_acknowledged(report_id: &str) -> Self {
        Self::new(
            MessageType::ReportAcknowledged,
            serde_json::json!({ "report_id": report_id }),
        )
    }

    pub fn system_message(text: &str, message_type: MessageType) -> Self {
        Self::new(
            message_type,
            serde_json::json!({
                "message": text,
                "broadcast": true,
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// Client → Server frame
// ---------------------------------------------------------------------------

/// A frame received from a connected device.
///
/// Unrecognized types deserialize to [`ClientFrame::Unknown`] so they can be
/// logged and ignored without tearing the session down.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Subscribe {
        #[serde(default)]
        threat_types: Vec<String>,
        #[serde(default)]
        risk_threshold: Option<u8>,
    },
    Unsubscribe {
        #[serde(default)]
        threat_types: Vec<String>,
    },
    ReportThreat {
        #[serde(default)]
        data: Value,
    },
    #[serde(other)]
    Unknown,
}
