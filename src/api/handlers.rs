use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;
use crate::shutdown::{ShutdownPhase, ShutdownState};

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub(super) struct StatusResponse {
    phase: &'static str,
    accepting: bool,
    active_sessions: usize,
    /// Connections currently subscribed to broadcasts.
    broadcast_subscribers: usize,
    instance: String,
    drain_timeout_secs: u64,
    /// Seconds until forced termination; present only while draining.
    #[serde(skip_serializing_if = "Option::is_none")]
    deadline_secs: Option<u64>,
}

pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let shutdown_state = state.shutdown.state();
    let phase = match shutdown_state.phase() {
        ShutdownPhase::Running => "running",
        ShutdownPhase::Draining => "draining",
        ShutdownPhase::Terminated => "terminated",
    };
    let deadline_secs = match shutdown_state {
        ShutdownState::Draining { deadline, .. } => Some(
            deadline
                .saturating_duration_since(tokio::time::Instant::now())
                .as_secs(),
        ),
        _ => None,
    };

    Json(StatusResponse {
        phase,
        accepting: state.shutdown.is_accepting(),
        active_sessions: state.hooks.registry().len(),
        broadcast_subscribers: state.broker.subscriber_count(),
        instance: state.instance.to_string(),
        drain_timeout_secs: state.shutdown.config().drain_timeout.as_secs(),
        deadline_secs,
    })
}
