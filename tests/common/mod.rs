#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use notifyd::session::{CloseError, CloseHandle, SessionRegistry};
use notifyd::shutdown::{DrainConfig, ShutdownCoordinator};

/// Close handle that counts how many times it was force-closed.
#[derive(Default)]
pub struct RecordingHandle {
    closes: AtomicUsize,
}

impl RecordingHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CloseHandle for RecordingHandle {
    fn force_close(&self) -> Result<(), CloseError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Close handle whose transport is already gone.
pub struct FailingHandle;

impl CloseHandle for FailingHandle {
    fn force_close(&self) -> Result<(), CloseError> {
        Err(CloseError::Transport("broken pipe".into()))
    }
}

/// Coordinator with the given drain timeout and a 1s poll interval.
pub fn coordinator(drain_timeout: Duration) -> (SessionRegistry, ShutdownCoordinator) {
    let registry = SessionRegistry::new();
    let shutdown = ShutdownCoordinator::new(
        registry.clone(),
        DrainConfig {
            drain_timeout,
            poll_interval: Duration::from_secs(1),
        },
    );
    (registry, shutdown)
}
