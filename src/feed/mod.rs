//! Connection registry and alert fan-out engine.

pub mod alert;
pub mod channel;
pub mod delivery;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod supervisor;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::kv::KeyValueStore;

use alert::ThreatAlert;
use channel::DeviceChannel;
use delivery::DeliveryEngine;
use message::MessageType;
use registry::{RegistryStats, SessionRegistry};
use supervisor::LivenessSupervisor;

/// The feed core: registry, delivery engine and liveness supervisor under a
/// single owned handle with an explicit lifecycle.
///
/// Constructed once at startup and shared as `Arc<Feed>`; `start`/`stop`
/// control the background loops. The methods below are the producer-facing
/// API consumed by the external REST layer.
pub struct Feed {
    registry: Arc<SessionRegistry>,
    delivery: DeliveryEngine,
    supervisor: LivenessSupervisor,
}

impl Feed {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        let delivery = DeliveryEngine::new(registry.clone(), store);
        let supervisor = LivenessSupervisor::new(registry.clone());
        Self {
            registry,
            delivery,
            supervisor,
        }
    }

    /// Start the reaper and heartbeat loops.
    pub fn start(&self) {
        self.supervisor.start();
    }

    /// Stop the background loops, waiting for them to wind down.
    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn delivery(&self) -> &DeliveryEngine {
        &self.delivery
    }

    pub async fn register(
        &self,
        device_id: &str,
        channel: Arc<dyn DeviceChannel>,
        initial_subscriptions: Option<HashSet<String>>,
    ) -> String {
        self.registry
            .register(device_id, channel, initial_subscriptions)
            .await
    }

    pub async fn unregister_device(&self, device_id: &str) {
        self.registry.unregister_device(device_id).await;
    }

    pub async fn submit_alert(
        &self,
        alert: &ThreatAlert,
        target_devices: Option<&[String]>,
    ) -> usize {
        self.delivery.submit_alert(alert, target_devices).await
    }

    pub async fn submit_update(
        &self,
        payload: Value,
        target_devices: Option<&[String]>,
    ) -> usize {
        self.delivery.submit_update(payload, target_devices).await
    }

    pub async fn broadcast_system_message(
        &self,
        text: &str,
        message_type: MessageType,
    ) -> usize {
        self.delivery
            .broadcast_system_message(text, message_type)
            .await
    }

    pub fn get_stats(&self) -> RegistryStats {
        self.registry.snapshot_stats()
    }
}
