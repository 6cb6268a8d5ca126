//! Graceful shutdown coordination for connected clients.
//!
//! ```text
//! Running --(first signal)--> Draining --(registry empty | deadline)--> Terminated
//! ```
//!
//! On the first termination signal the coordinator:
//! 1. Switches to `Draining` and fixes the deadline (start + drain timeout)
//! 2. Fires the stop-accepting token so the transport refuses new connections
//! 3. Spawns the drain loop, which waits for the registry to empty and falls
//!    back to force-closing whatever is left at the deadline
//!
//! Later signals are logged and ignored. `Terminated` is final.

pub mod drain;
pub mod force;
mod signal;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::session::SessionRegistry;

pub use force::ForceReport;

/// Default time allowed for clients to disconnect on their own.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default cadence at which the drain loop re-checks the registry.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for the drain phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    pub drain_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How a drain finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every client disconnected before the deadline.
    Drained,
    /// The deadline elapsed and the remaining sessions were force-closed.
    Forced(ForceReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Terminated,
}

/// Process-wide shutdown state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining { started: Instant, deadline: Instant },
    Terminated(DrainOutcome),
}

impl ShutdownState {
    pub fn phase(&self) -> ShutdownPhase {
        match self {
            ShutdownState::Running => ShutdownPhase::Running,
            ShutdownState::Draining { .. } => ShutdownPhase::Draining,
            ShutdownState::Terminated(_) => ShutdownPhase::Terminated,
        }
    }
}

/// Coordinates the Running → Draining → Terminated lifecycle.
///
/// Constructed once by the process entry point and cloned into whatever
/// needs to observe it. Clones share the same state.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SessionRegistry,
    config: DrainConfig,
    /// Only `trigger` and the drain task write to this.
    state_tx: watch::Sender<ShutdownState>,
    /// Cancelled when draining begins.
    stop_accepting: CancellationToken,
    /// Cancelled when the coordinator reaches `Terminated`.
    terminated: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(registry: SessionRegistry, config: DrainConfig) -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                state_tx,
                stop_accepting: CancellationToken::new(),
                terminated: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> DrainConfig {
        self.inner.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Install SIGINT/SIGTERM handlers and spawn the task that listens for
    /// them. Returns as soon as the handlers are installed.
    ///
    /// Every signal is forwarded to [`trigger`](Self::trigger); only the
    /// first one has an effect. The listener exits once the coordinator
    /// reaches `Terminated`.
    pub fn start(&self) -> std::io::Result<JoinHandle<()>> {
        let mut signals = signal::TerminationSignals::install()?;
        let coordinator = self.clone();
        let terminated = self.inner.terminated.clone();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    name = signals.recv() => {
                        tracing::info!(signal = name, "received termination signal");
                        coordinator.trigger();
                    }
                    _ = terminated.cancelled() => break,
                }
            }
            tracing::debug!("signal listener exiting");
        }))
    }

    /// Begin draining.
    ///
    /// Returns `true` if this call moved the coordinator from `Running` to
    /// `Draining` and launched the drain loop, `false` if a shutdown was
    /// already under way. Must be called from within a Tokio runtime.
    pub fn trigger(&self) -> bool {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.inner.config.drain_timeout)
            .unwrap_or_else(|| started + Duration::from_secs(u32::MAX as u64));

        let entered = self.inner.state_tx.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining { started, deadline };
                true
            } else {
                false
            }
        });

        if !entered {
            tracing::info!(phase = ?self.phase(), "shutdown already in progress, ignoring signal");
            return false;
        }

        let active = self.inner.registry.len();
        tracing::warn!(
            active,
            drain_timeout_secs = self.inner.config.drain_timeout.as_secs(),
            "starting graceful shutdown"
        );

        self.inner.stop_accepting.cancel();

        let coordinator = self.clone();
        tokio::spawn(async move {
            let outcome = drain::run(
                &coordinator.inner.registry,
                deadline,
                coordinator.inner.config.poll_interval,
            )
            .await;
            coordinator.finish(outcome, started);
        });

        true
    }

    fn finish(&self, outcome: DrainOutcome, started: Instant) {
        self.inner
            .state_tx
            .send_replace(ShutdownState::Terminated(outcome));
        self.inner.terminated.cancel();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            DrainOutcome::Drained => {
                tracing::info!(elapsed_ms, "all clients disconnected gracefully");
            }
            DrainOutcome::Forced(report) => {
                tracing::warn!(
                    elapsed_ms,
                    remaining = report.total(),
                    closed = report.closed,
                    failed = report.failed,
                    "forced shutdown after drain timeout"
                );
            }
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.inner.state_tx.borrow()
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.state().phase()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.inner.state_tx.subscribe()
    }

    /// Token that is cancelled when draining begins. The transport stops
    /// accepting connections once it fires.
    pub fn stop_accepting(&self) -> CancellationToken {
        self.inner.stop_accepting.clone()
    }

    pub fn is_accepting(&self) -> bool {
        !self.inner.stop_accepting.is_cancelled()
    }

    /// Wait until the coordinator reaches `Terminated`.
    pub async fn wait_for_termination(&self) -> DrainOutcome {
        let mut rx = self.subscribe();
        loop {
            if let ShutdownState::Terminated(outcome) = *rx.borrow_and_update() {
                return outcome;
            }
            // The sender lives in `self.inner`, so the channel stays open
            // for as long as we are waiting on it.
            let _ = rx.changed().await;
        }
    }
}
