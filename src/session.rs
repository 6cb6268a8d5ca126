//! Live client sessions.
//!
//! The [`SessionRegistry`] is the set of connections the shutdown drain waits
//! on. The transport registers each connection with an opaque
//! [`CloseHandle`] so the force-terminator can close it at the deadline.

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast as tokio_broadcast;

/// Validate a client-supplied session id. Ids must be 1-64 chars,
/// alphanumeric/hyphens/underscores/dots.
pub fn validate_session_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("session id must not be empty".into());
    }
    if id.len() > 64 {
        return Err(format!("session id too long ({} chars, max 64)", id.len()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(format!(
            "session id contains invalid characters: {}",
            id.chars().take(64).collect::<String>()
        ));
    }
    Ok(())
}

/// Opaque identifier of one client connection, assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id (UUID v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Errors a transport may report when asked to force-close a connection.
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    #[error("connection already closed")]
    AlreadyClosed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Server-side close primitive for one connection.
///
/// Implemented by the transport layer. Must be safe to call on a connection
/// that is already closed (returning [`CloseError::AlreadyClosed`] is fine)
/// and must not block.
pub trait CloseHandle: Send + Sync {
    fn force_close(&self) -> Result<(), CloseError>;
}

/// One live client connection.
///
/// The `handle` is owned by the transport; the registry only keeps a shared
/// reference so the force-terminator can reach it.
#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub handle: Arc<dyn CloseHandle>,
    /// When the connection registered. Diagnostics only.
    pub connected_at: Instant,
    /// Per-registration sequence number assigned by the registry. A replaced
    /// entry and its replacement never share a generation.
    pub generation: u64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

/// Lifecycle events emitted by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Registered { id: SessionId, replaced: bool },
    Deregistered { id: SessionId },
    /// Every remaining entry was taken by [`SessionRegistry::drain_all`].
    Drained { count: usize },
}

/// Result of [`SessionRegistry::register`].
#[derive(Debug)]
pub struct Registered {
    pub generation: u64,
    /// The entry previously stored under the same id, if any. Its handle is
    /// still live; the caller decides what to do with it.
    pub replaced: Option<Session>,
}

struct RegistryInner {
    sessions: HashMap<SessionId, Session>,
    next_generation: u64,
}

/// The set of currently connected sessions, keyed by id.
///
/// Every operation runs under one lock, so register, deregister, size reads
/// and `drain_all` are linearizable with respect to each other. Cloning
/// yields another handle to the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    events_tx: tokio_broadcast::Sender<SessionEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry with a broadcast channel for lifecycle events.
    pub fn new() -> Self {
        let (events_tx, _) = tokio_broadcast::channel(256);
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                next_generation: 0,
            })),
            events_tx,
        }
    }

    /// Insert a session, replacing any existing entry with the same id.
    ///
    /// Never fails. The replaced entry (a reconnect racing its own stale
    /// registration) is handed back untouched.
    pub fn register(&self, id: SessionId, handle: Arc<dyn CloseHandle>) -> Registered {
        let mut inner = self.inner.write();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let session = Session {
            id: id.clone(),
            handle,
            connected_at: Instant::now(),
            generation,
        };
        let replaced = inner.sessions.insert(id.clone(), session);

        // Ignore send errors: no receivers is fine.
        let _ = self.events_tx.send(SessionEvent::Registered {
            id,
            replaced: replaced.is_some(),
        });

        Registered { generation, replaced }
    }

    /// Remove the session with this id. Removing an absent id is a no-op.
    pub fn deregister(&self, id: &str) -> Option<Session> {
        let mut inner = self.inner.write();
        let removed = inner.sessions.remove(id);
        if let Some(ref session) = removed {
            let _ = self.events_tx.send(SessionEvent::Deregistered {
                id: session.id.clone(),
            });
        }
        removed
    }

    /// Remove the session with this id only if it is still the registration
    /// identified by `generation`.
    ///
    /// Used by connection guards so that a replaced connection closing late
    /// cannot evict the connection that replaced it.
    pub fn deregister_generation(&self, id: &str, generation: u64) -> Option<Session> {
        let mut inner = self.inner.write();
        match inner.sessions.get(id) {
            Some(current) if current.generation == generation => {}
            _ => return None,
        }
        let removed = inner.sessions.remove(id);
        if let Some(ref session) = removed {
            let _ = self.events_tx.send(SessionEvent::Deregistered {
                id: session.id.clone(),
            });
        }
        removed
    }

    /// Atomically take every registered session, leaving the registry empty.
    ///
    /// A disconnect arriving afterwards finds nothing to remove, so a session
    /// can never be both force-closed and disconnect-processed.
    pub fn drain_all(&self) -> Vec<Session> {
        let mut inner = self.inner.write();
        let drained: Vec<Session> = inner.sessions.drain().map(|(_, s)| s).collect();
        let _ = self.events_tx.send(SessionEvent::Drained {
            count: drained.len(),
        });
        drained
    }

    /// Return the ids of all registered sessions, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let inner = self.inner.read();
        let mut ids: Vec<SessionId> = inner.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// Subscribe to registry lifecycle events.
    pub fn subscribe_events(&self) -> tokio_broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}
