//! notifyd - a WebSocket notification server that drains on shutdown.
//!
//! Clients connect over `/ws` and receive broadcast notifications. On
//! SIGINT/SIGTERM the server stops accepting connections, waits for
//! connected clients to leave on their own for up to the drain timeout, and
//! force-closes whoever is left.

pub mod api;
pub mod broker;
pub mod config;
pub mod hooks;
pub mod protocol;
pub mod server;
pub mod session;
pub mod shutdown;
