//! Connect/disconnect entry points for the transport layer.
//!
//! The transport calls [`SessionHooks::on_connect`] once per accepted
//! connection and keeps the returned [`SessionGuard`] alive for the
//! connection's lifetime. Dropping the guard is the disconnect hook.
//! Transports that cannot hold a guard may call
//! [`SessionHooks::on_disconnect`] directly instead.
//!
//! Both paths sit on the hot connect/disconnect path: they take the registry
//! lock and nothing else.

use std::sync::Arc;

use crate::session::{CloseHandle, SessionId, SessionRegistry};

#[derive(Clone)]
pub struct SessionHooks {
    registry: SessionRegistry,
}

impl SessionHooks {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Register a newly opened connection.
    ///
    /// A stale entry under the same id (a client reconnecting before its old
    /// connection was torn down) is replaced, and its handle is force-closed
    /// so the old connection does not linger untracked.
    pub fn on_connect(&self, id: SessionId, handle: Arc<dyn CloseHandle>) -> SessionGuard {
        let registered = self.registry.register(id.clone(), handle);

        if let Some(stale) = registered.replaced {
            tracing::info!(session = %id, "replacing stale registration");
            if let Err(e) = stale.handle.force_close() {
                tracing::debug!(session = %id, error = %e, "stale connection close failed");
            }
        }

        tracing::info!(session = %id, active = self.registry.len(), "client connected");

        SessionGuard {
            registry: self.registry.clone(),
            id,
            generation: registered.generation,
        }
    }

    /// Deregister a connection by id. A no-op if it is already gone (for
    /// example after a forced shutdown cleared the registry).
    pub fn on_disconnect(&self, id: &str) {
        let removed = self.registry.deregister(id).is_some();
        tracing::info!(session = %id, removed, active = self.registry.len(), "client disconnected");
    }
}

/// RAII guard that deregisters its own registration when dropped.
///
/// Only the registration that created the guard is removed; if the id was
/// re-registered by a newer connection, dropping the old guard leaves the
/// newer entry in place.
pub struct SessionGuard {
    registry: SessionRegistry,
    id: SessionId,
    generation: u64,
}

impl SessionGuard {
    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let removed = self
            .registry
            .deregister_generation(self.id.as_str(), self.generation)
            .is_some();
        tracing::info!(
            session = %self.id,
            removed,
            active = self.registry.len(),
            "client disconnected"
        );
    }
}
