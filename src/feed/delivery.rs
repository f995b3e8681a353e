//! Fan-out of alerts/updates to eligible sessions and the inbound
//! client-frame state machine.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::id;
use crate::kv::KeyValueStore;

use super::alert::ThreatAlert;
use super::message::{ClientFrame, Envelope, MessageType};
use super::registry::SessionRegistry;
use super::session::Session;

const REPORT_QUEUE_KEY: &str = "threat_reports";

pub struct DeliveryEngine {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn KeyValueStore>,
}

impl DeliveryEngine {
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { registry, store }
    }

    /// Fan an alert out to its eligible sessions.
    ///
    /// With `target_devices`, each device is resolved to its live session and
    /// eligibility filtering is skipped; devices with no live session are
    /// skipped silently. Without targets, every live session is evaluated
    /// against the eligibility predicate. Returns the delivered count.
    pub async fn submit_alert(
        &self,
        alert: &ThreatAlert,
        target_devices: Option<&[String]>,
    ) -> usize {
        let targets = match target_devices {
            Some(devices) => self.resolve_devices(devices),
            None => self
                .registry
                .snapshot()
                .into_iter()
                .filter(|session| session.wants_alert(alert))
                .collect(),
        };

        let envelope = Envelope::threat_alert(alert);
        let delivered = self.deliver(&envelope, targets).await;
        tracing::info!(
            alert_id = %alert.alert_id,
            alert_type = alert.alert_type.as_str(),
            delivered,
            "threat alert fanned out"
        );
        delivered
    }

    /// Deliver a security update unconditionally to the resolved sessions.
    pub async fn submit_update(
        &self,
        payload: Value,
        target_devices: Option<&[String]>,
    ) -> usize {
        let targets = match target_devices {
            Some(devices) => self.resolve_devices(devices),
            None => self.registry.snapshot(),
        };
        let envelope = Envelope::security_update(payload);
        let delivered = self.deliver(&envelope, targets).await;
        tracing::info!(delivered, "security update fanned out");
        delivered
    }

    /// Broadcast a system message to every live session.
    pub async fn broadcast_system_message(
        &self,
        text: &str,
        message_type: MessageType,
    ) -> usize {
        let envelope = Envelope::system_message(text, message_type);
        let delivered = self.deliver(&envelope, self.registry.snapshot()).await;
        tracing::info!(delivered, "system message broadcast");
        delivered
    }

    /// Process one inbound frame for a session.
    ///
    /// A no-op if the session is no longer registered: the frame raced a
    /// teardown, which is benign.
    pub async fn handle_client_frame(&self, session_id: &str, frame: ClientFrame) {
        let Some(session) = self.registry.lookup(session_id) else {
            tracing::debug!(session_id, "frame for unknown session dropped");
            return;
        };
        session.touch();

        match frame {
            ClientFrame::Ping => {
                self.reply(&session, &Envelope::pong()).await;
            }
            ClientFrame::Subscribe {
                threat_types,
                risk_threshold,
            } => {
                let filters = session.apply_subscribe(&threat_types, risk_threshold);
                let ack = Envelope::subscription_updated(
                    filters.subscription_list(),
                    filters.risk_threshold,
                );
                self.reply(&session, &ack).await;
            }
            ClientFrame::Unsubscribe { threat_types } => {
                session.apply_unsubscribe(&threat_types);
            }
            ClientFrame::ReportThreat { data } => {
                self.handle_threat_report(&session, data).await;
            }
            ClientFrame::Unknown => {
                tracing::warn!(session_id, device_id = %session.device_id, "unknown frame type");
            }
        }
    }

    /// Queue a device-submitted threat report and acknowledge it. Enqueue
    /// failure is logged, never surfaced to the device as a protocol error.
    async fn handle_threat_report(&self, session: &Arc<Session>, data: Value) {
        let report_id = id::prefixed_ulid(id::prefix::REPORT);
        let report = serde_json::json!({
            "report_id": report_id,
            "device_id": session.device_id,
            "report_data": data,
            "timestamp": Utc::now(),
        });
        match serde_json::to_string(&report) {
            Ok(json) => {
                if let Err(err) = self.store.lpush(REPORT_QUEUE_KEY, &json).await {
                    tracing::error!(%report_id, %err, "failed to enqueue threat report");
                } else {
                    tracing::info!(%report_id, device_id = %session.device_id, "threat report received");
                }
            }
            Err(err) => tracing::error!(%report_id, %err, "failed to serialize threat report"),
        }
        self.reply(session, &Envelope::report_acknowledged(&report_id))
            .await;
    }

    fn resolve_devices(&self, devices: &[String]) -> Vec<Arc<Session>> {
        devices
            .iter()
            .filter_map(|device_id| self.registry.lookup_by_device(device_id))
            .collect()
    }

    /// Best-effort send to each target. A failed send is evidence of a dead
    /// channel: the session is scheduled for teardown, never retried, and
    /// excluded from the delivered count.
    async fn deliver(&self, envelope: &Envelope, targets: Vec<Arc<Session>>) -> usize {
        let mut delivered = 0;
        for session in targets {
            match session.send(envelope).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        device_id = %session.device_id,
                        %err,
                        "delivery failed; scheduling teardown"
                    );
                    self.schedule_teardown(&session.session_id);
                }
            }
        }
        delivered
    }

    async fn reply(&self, session: &Arc<Session>, envelope: &Envelope) {
        if let Err(err) = session.send(envelope).await {
            tracing::warn!(
                session_id = %session.session_id,
                %err,
                "reply failed; scheduling teardown"
            );
            self.schedule_teardown(&session.session_id);
        }
    }

    fn schedule_teardown(&self, session_id: &str) {
        let registry = self.registry.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            registry.unregister(&session_id).await;
        });
    }
}
