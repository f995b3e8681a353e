//! Background liveness loops: stale-session reaper and heartbeat pinger.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use super::message::Envelope;
use super::registry::SessionRegistry;

pub const REAPER_INTERVAL: Duration = Duration::from_secs(60);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Inbound inactivity after which the reaper tears a session down.
pub const STALE_AFTER: Duration = Duration::from_secs(300);

/// Owns the two periodic liveness loops. Started and stopped in lockstep
/// with the registry's lifecycle; shutdown is cooperative, checked at every
/// tick so in-flight sends complete or fail cleanly.
pub struct LivenessSupervisor {
    registry: Arc<SessionRegistry>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LivenessSupervisor {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the reaper and heartbeat loops. Single concurrent instance of
    /// each per supervisor.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        tasks.push(spawn_loop(
            "reaper",
            REAPER_INTERVAL,
            self.shutdown.subscribe(),
            self.registry.clone(),
            |registry| async move {
                reap_stale_sessions(&registry, STALE_AFTER).await;
            },
        ));
        tasks.push(spawn_loop(
            "heartbeat",
            HEARTBEAT_INTERVAL,
            self.shutdown.subscribe(),
            self.registry.clone(),
            |registry| async move {
                ping_live_sessions(&registry).await;
            },
        ));
        tracing::info!("liveness supervisor started");
    }

    /// Signal both loops to stop and wait for them to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(%err, "supervisor task ended abnormally");
            }
        }
        tracing::info!("liveness supervisor stopped");
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    registry: Arc<SessionRegistry>,
    pass: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<SessionRegistry>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.tick().await; // First tick fires immediately; skip it.
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    pass(registry.clone()).await;
                }
                _ = shutdown.changed() => {
                    tracing::debug!(name, "liveness loop shutting down");
                    break;
                }
            }
        }
    })
}

/// One reaper pass: tear down every session whose last inbound activity is
/// older than `stale_after`. Snapshot-then-act, so concurrent registry
/// mutation during the scan is fine. Returns the number reaped.
pub async fn reap_stale_sessions(registry: &SessionRegistry, stale_after: Duration) -> usize {
    let now = chrono::Utc::now();
    let stale: Vec<_> = registry
        .snapshot()
        .into_iter()
        .filter(|session| {
            (now - session.last_seen())
                .to_std()
                .map(|idle| idle > stale_after)
                .unwrap_or(false)
        })
        .collect();

    let mut reaped = 0;
    for session in stale {
        tracing::info!(
            session_id = %session.session_id,
            device_id = %session.device_id,
            "reaping stale session"
        );
        registry.unregister(&session.session_id).await;
        reaped += 1;
    }
    reaped
}

/// One heartbeat pass: send a `server_ping` to every live session and tear
/// down those whose send fails. Failure is detected at send time; no reply
/// is required. Returns the number successfully pinged.
pub async fn ping_live_sessions(registry: &SessionRegistry) -> usize {
    let envelope = Envelope::server_ping();
    let mut pinged = 0;
    let mut failed = Vec::new();

    for session in registry.snapshot() {
        match session.send(&envelope).await {
            Ok(()) => pinged += 1,
            Err(err) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    device_id = %session.device_id,
                    %err,
                    "heartbeat failed"
                );
                failed.push(session.session_id.clone());
            }
        }
    }

    for session_id in failed {
        registry.unregister(&session_id).await;
    }
    pinged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::channel::InMemoryChannel;
    use crate::kv::MemoryStore;

    fn test_registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn reaper_removes_only_stale_sessions() {
        let registry = test_registry();
        let stale = registry
            .register("device-1", Arc::new(InMemoryChannel::new()), None)
            .await;
        registry
            .register("device-2", Arc::new(InMemoryChannel::new()), None)
            .await;

        registry
            .lookup(&stale)
            .unwrap()
            .set_last_seen(chrono::Utc::now() - chrono::Duration::seconds(600));

        let reaped = reap_stale_sessions(&registry, STALE_AFTER).await;
        assert_eq!(reaped, 1);
        assert!(registry.lookup(&stale).is_none());
        assert!(registry.lookup_by_device("device-2").is_some());
    }

    #[tokio::test]
    async fn reaper_pass_is_idempotent() {
        let registry = test_registry();
        let session_id = registry
            .register("device-1", Arc::new(InMemoryChannel::new()), None)
            .await;
        registry
            .lookup(&session_id)
            .unwrap()
            .set_last_seen(chrono::Utc::now() - chrono::Duration::seconds(600));

        assert_eq!(reap_stale_sessions(&registry, STALE_AFTER).await, 1);
        // No intervening activity: second pass is a no-op.
        assert_eq!(reap_stale_sessions(&registry, STALE_AFTER).await, 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn heartbeat_pings_and_reaps_broken_channels() {
        let registry = test_registry();
        let healthy = Arc::new(InMemoryChannel::new());
        let broken = Arc::new(InMemoryChannel::new());
        registry.register("device-1", healthy.clone(), None).await;
        registry.register("device-2", broken.clone(), None).await;
        broken.set_failing(true);

        let pinged = ping_live_sessions(&registry).await;
        assert_eq!(pinged, 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup_by_device("device-2").is_none());

        let sent = healthy.sent_json();
        assert_eq!(sent.last().unwrap()["message_type"], "server_ping");
    }

    #[tokio::test]
    async fn supervisor_starts_and_stops_cleanly() {
        let registry = test_registry();
        let supervisor = LivenessSupervisor::new(registry);
        supervisor.start();
        // Starting twice must not spawn duplicate loops.
        supervisor.start();
        assert_eq!(supervisor.tasks.lock().len(), 2);
        supervisor.stop().await;
        assert!(supervisor.tasks.lock().is_empty());
    }
}
