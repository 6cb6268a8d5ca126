//! The drain loop: wait for the registry to empty, bounded by a deadline.

use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use super::force::force_terminate_all;
use super::DrainOutcome;
use crate::session::SessionRegistry;

/// Run the drain loop until the registry is empty or `deadline` passes.
///
/// Each iteration first checks for an empty registry, then for an expired
/// deadline, in that order. Between checks the loop sleeps until the next
/// poll tick (never past the deadline); a registry event cuts the sleep short
/// so an emptied registry is noticed without waiting out the interval. The
/// loop itself performs no connection I/O.
pub async fn run(
    registry: &SessionRegistry,
    deadline: Instant,
    poll_interval: Duration,
) -> DrainOutcome {
    // Subscribe before the first check so no deregistration is missed.
    let mut events = registry.subscribe_events();
    let poll_interval = poll_interval.max(Duration::from_millis(1));
    let mut next_report = Instant::now();

    loop {
        let active = registry.len();
        if active == 0 {
            return DrainOutcome::Drained;
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::error!(
                active,
                "drain timeout reached with clients still connected, forcing shutdown"
            );
            return DrainOutcome::Forced(force_terminate_all(registry));
        }

        if now >= next_report {
            tracing::info!(
                active,
                time_left = %format_remaining(deadline - now),
                "waiting for clients to disconnect"
            );
            next_report = now + poll_interval;
        }

        let wake = (now + poll_interval).min(deadline);
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            event = events.recv() => {
                match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    // Cannot happen while `registry` is borrowed, but never
                    // spin on a closed channel.
                    Err(RecvError::Closed) => tokio::time::sleep_until(wake).await,
                }
            }
        }
    }
}

/// Format a remaining duration as `MMm SSs`.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}m {:02}s", secs / 60, secs % 60)
}
