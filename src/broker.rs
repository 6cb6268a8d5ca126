//! Local broadcast fan-out to connected sessions.
//!
//! The [`Broker`] only reaches sessions held by this process. When several
//! instances run behind a load balancer, a broadcast published on one
//! instance is never seen by clients connected to another: cross-instance
//! delivery needs an external publish/subscribe backend, which this server
//! does not provide. Treat that as a deployment constraint (sticky routing,
//! or a single instance) rather than expecting global delivery.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

use crate::protocol::ServerEvent;
use crate::session::SessionRegistry;
use crate::shutdown::{ShutdownCoordinator, ShutdownPhase, ShutdownState};

pub const BROADCAST_CAPACITY: usize = 64;

/// Fan-out of serialized [`ServerEvent`]s to every local WebSocket task.
#[derive(Clone)]
pub struct Broker {
    tx: broadcast::Sender<Arc<str>>,
}

impl Broker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Returns how many
    /// subscribers it reached.
    pub fn publish(&self, event: &ServerEvent) -> usize {
        let json: Arc<str> = Arc::from(event.to_json());
        // Err means no receivers.
        self.tx.send(json).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic notification task.
///
/// Every `interval` it publishes a numbered notification, but only while at
/// least one session is connected. When the coordinator starts draining it
/// publishes a single [`ServerEvent::Draining`] notice and returns.
pub async fn run_notifier(
    broker: Broker,
    registry: SessionRegistry,
    shutdown: ShutdownCoordinator,
    interval: Duration,
    instance: String,
) {
    let mut state_rx = shutdown.subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so the first
    // notification goes out one interval after startup.
    ticker.tick().await;
    let mut counter: u64 = 0;

    loop {
        if state_rx.borrow_and_update().phase() != ShutdownPhase::Running {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if registry.is_empty() {
                    continue;
                }
                counter += 1;
                let reached = broker.publish(&ServerEvent::Notification {
                    id: counter,
                    text: format!("Server notification #{counter}"),
                    time: unix_time(),
                    instance: instance.clone(),
                });
                tracing::debug!(id = counter, reached, "broadcast notification");
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }

    let deadline_secs = match shutdown.state() {
        ShutdownState::Draining { deadline, .. } => {
            deadline.saturating_duration_since(tokio::time::Instant::now()).as_secs()
        }
        _ => 0,
    };
    broker.publish(&ServerEvent::Draining { deadline_secs });
    tracing::info!("notifier stopped due to shutdown");
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
