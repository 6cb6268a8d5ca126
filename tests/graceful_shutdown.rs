//! End-to-end drain scenarios against the coordinator, on a paused clock.
//!
//! Clients are modelled with recording close handles so the tests can check
//! exactly who was force-closed and how many times.

mod common;

use std::sync::Arc;
use std::time::Duration;
use common::{coordinator, FailingHandle, RecordingHandle};
use notifyd::hooks::SessionHooks;
use notifyd::session::SessionEvent;
use notifyd::shutdown::{DrainOutcome, ForceReport, ShutdownPhase, ShutdownState};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn clients_leaving_before_deadline_drain_without_force() {
    let (registry, shutdown) = coordinator(Duration::from_secs(10));
    let hooks = SessionHooks::new(registry.clone());

    let a = RecordingHandle::new();
    let b = RecordingHandle::new();
    let guard_a = hooks.on_connect("A".into(), a.clone());
    let guard_b = hooks.on_connect("B".into(), b.clone());

    let started = Instant::now();
    assert!(shutdown.trigger());
    assert_eq!(shutdown.phase(), ShutdownPhase::Draining);
    assert!(!shutdown.is_accepting());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(guard_a);
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(guard_b);
    });

    let outcome = shutdown.wait_for_termination().await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, DrainOutcome::Drained);
    assert!(
        elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(7),
        "drain finished after {:?}",
        elapsed
    );
    assert_eq!(a.close_count(), 0);
    assert_eq!(b.close_count(), 0);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deadline_force_closes_each_remaining_client_once() {
    let (registry, shutdown) = coordinator(Duration::from_secs(3));
    let hooks = SessionHooks::new(registry.clone());

    let a = RecordingHandle::new();
    let b = RecordingHandle::new();
    let _guard_a = hooks.on_connect("A".into(), a.clone());
    let _guard_b = hooks.on_connect("B".into(), b.clone());

    let started = Instant::now();
    shutdown.trigger();
    let outcome = shutdown.wait_for_termination().await;
    let elapsed = started.elapsed();

    assert_eq!(
        outcome,
        DrainOutcome::Forced(ForceReport {
            closed: 2,
            failed: 0
        })
    );
    assert!(
        elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4),
        "forced after {:?}",
        elapsed
    );
    assert_eq!(a.close_count(), 1);
    assert_eq!(b.close_count(), 1);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_registry_terminates_immediately() {
    let (_registry, shutdown) = coordinator(Duration::from_secs(30 * 60));

    let started = Instant::now();
    shutdown.trigger();
    let outcome = shutdown.wait_for_termination().await;

    assert_eq!(outcome, DrainOutcome::Drained);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(shutdown.phase(), ShutdownPhase::Terminated);
}

#[tokio::test(start_paused = true)]
async fn second_signal_keeps_first_deadline() {
    let (registry, shutdown) = coordinator(Duration::from_secs(10));
    let _a = registry.register("A".into(), RecordingHandle::new());

    assert!(shutdown.trigger());
    let first = shutdown.state();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!shutdown.trigger());
    assert_eq!(shutdown.state(), first);

    let ShutdownState::Draining { started, deadline } = first else {
        panic!("expected draining state, got {:?}", first);
    };
    assert_eq!(deadline - started, Duration::from_secs(10));

    let outcome = shutdown.wait_for_termination().await;
    assert!(matches!(outcome, DrainOutcome::Forced(r) if r.closed == 1));
}

#[tokio::test(start_paused = true)]
async fn trigger_after_termination_is_ignored() {
    let (_registry, shutdown) = coordinator(Duration::from_secs(5));
    shutdown.trigger();
    let outcome = shutdown.wait_for_termination().await;

    assert!(!shutdown.trigger());
    assert_eq!(shutdown.state(), ShutdownState::Terminated(outcome));
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_start_exactly_one_drain() {
    let (registry, shutdown) = coordinator(Duration::from_secs(2));
    let handle = RecordingHandle::new();
    registry.register("A".into(), handle.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { shutdown.trigger() }));
    }
    let mut started = 0;
    for task in tasks {
        if task.await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);

    shutdown.wait_for_termination().await;
    assert_eq!(handle.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn force_pass_drains_registry_in_one_event() {
    let (registry, shutdown) = coordinator(Duration::from_secs(1));
    for id in ["A", "B", "C"] {
        registry.register(id.into(), RecordingHandle::new());
    }
    let mut events = registry.subscribe_events();

    shutdown.trigger();
    shutdown.wait_for_termination().await;

    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Drained { count } = event {
            drained.push(count);
        }
    }
    assert_eq!(drained, vec![3]);
}

#[tokio::test(start_paused = true)]
async fn failing_handle_does_not_stop_force_pass() {
    let (registry, shutdown) = coordinator(Duration::from_secs(1));
    let ok = RecordingHandle::new();
    registry.register("broken".into(), Arc::new(FailingHandle));
    registry.register("ok".into(), ok.clone());

    shutdown.trigger();
    let outcome = shutdown.wait_for_termination().await;

    assert_eq!(
        outcome,
        DrainOutcome::Forced(ForceReport {
            closed: 1,
            failed: 1
        })
    );
    assert_eq!(ok.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_after_force_pass_is_harmless() {
    let (registry, shutdown) = coordinator(Duration::from_secs(1));
    let hooks = SessionHooks::new(registry.clone());
    let handle = RecordingHandle::new();
    let guard = hooks.on_connect("late".into(), handle.clone());

    shutdown.trigger();
    shutdown.wait_for_termination().await;

    // The transport notices the close and runs its disconnect hook.
    drop(guard);
    hooks.on_disconnect("late");

    assert_eq!(handle.close_count(), 1);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn drain_notices_disconnect_between_polls() {
    let (registry, shutdown) = coordinator(Duration::from_secs(60));
    let hooks = SessionHooks::new(registry.clone());
    let guard = hooks.on_connect("A".into(), RecordingHandle::new());

    let started = Instant::now();
    shutdown.trigger();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(guard);
    });

    assert_eq!(shutdown.wait_for_termination().await, DrainOutcome::Drained);
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_secs(2),
        "terminated after {:?}",
        elapsed
    );
}
