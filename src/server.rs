//! HTTP/WebSocket server with drain-on-shutdown.
//!
//! Wires the registry, coordinator, broker and router together and runs
//! them until the coordinator reaches `Terminated`:
//!
//! ```text
//! serve ─┬─ axum listener  (stops accepting when draining begins)
//!        ├─ notifier task  (stops when draining begins)
//!        └─ wait_for_termination ─▶ flush close frames ─▶ return outcome
//! ```

use std::time::Duration;
use tokio::net::TcpListener;

use crate::api::{self, AppState};
use crate::broker::{self, Broker};
use crate::config::Settings;
use crate::session::SessionRegistry;
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};

/// Time given to WebSocket tasks to flush close frames after termination.
const CLOSE_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on waiting for the HTTP listener task once terminated.
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How the HTTP listener task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerExit {
    /// Clean stop after the stop-accepting token fired.
    Expected,
    /// Clean stop while still accepting connections.
    Unexpected,
    /// I/O error or panic.
    Failed,
}

fn classify_listener_exit(
    result: &Result<std::io::Result<()>, tokio::task::JoinError>,
    accepting: bool,
) -> ListenerExit {
    match result {
        Ok(Ok(())) if !accepting => ListenerExit::Expected,
        Ok(Ok(())) => ListenerExit::Unexpected,
        _ => ListenerExit::Failed,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Server {
    settings: Settings,
    shutdown: ShutdownCoordinator,
    broker: Broker,
}

impl Server {
    pub fn new(settings: Settings) -> Self {
        let registry = SessionRegistry::new();
        let shutdown = ShutdownCoordinator::new(registry, settings.drain);
        Self {
            settings,
            shutdown,
            broker: Broker::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The coordinator driving this server's lifecycle. Clone it to trigger
    /// or observe shutdown from elsewhere.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.shutdown.registry()
    }

    /// Serve on `listener` until the coordinator terminates.
    ///
    /// Does not install signal handlers; call
    /// [`ShutdownCoordinator::start`] for that, or trigger the coordinator
    /// directly.
    pub async fn serve(self, listener: TcpListener) -> Result<DrainOutcome, ServerError> {
        let Server {
            settings,
            shutdown,
            broker,
        } = self;

        tracing::info!(
            addr = %listener.local_addr()?,
            instance = %settings.instance,
            "HTTP/WS server listening"
        );
        tracing::info!(
            "broadcasts reach only clients connected to this instance; \
             multi-instance deployments need an external pub/sub backend"
        );

        let notifier = tokio::spawn(broker::run_notifier(
            broker.clone(),
            shutdown.registry().clone(),
            shutdown.clone(),
            settings.broadcast_interval,
            settings.instance.clone(),
        ));

        let state = AppState::new(shutdown.clone(), broker, settings.instance.clone());
        let app = api::router(state);
        let stop_accepting = shutdown.stop_accepting();
        let mut http_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop_accepting.cancelled().await })
                .await
        });

        // The listener normally finishes as soon as draining begins. Only a
        // listener exit while still accepting needs handling here.
        let listener_result = tokio::select! {
            _ = shutdown.wait_for_termination() => None,
            result = &mut http_handle => Some(result),
        };
        let listener_done = listener_result.is_some();
        if let Some(result) = listener_result {
            if classify_listener_exit(&result, shutdown.is_accepting()) == ListenerExit::Expected {
                tracing::debug!("HTTP listener stopped accepting, waiting for drain");
            } else {
                match result {
                    Ok(Ok(())) => tracing::warn!("HTTP server stopped unexpectedly"),
                    Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
                    Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
                }
                // Drain existing sessions the same way a signal would.
                shutdown.trigger();
            }
        }
        let outcome = shutdown.wait_for_termination().await;

        // Give handlers a moment to flush close frames before returning.
        tokio::time::sleep(CLOSE_FLUSH_DELAY).await;

        if !listener_done {
            match tokio::time::timeout(LISTENER_STOP_TIMEOUT, &mut http_handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "HTTP server error during shutdown"),
                Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server task panicked"),
                Err(_) => {
                    tracing::warn!("HTTP server did not stop in time, aborting");
                    http_handle.abort();
                }
            }
        }
        notifier.abort();

        Ok(outcome)
    }
}
