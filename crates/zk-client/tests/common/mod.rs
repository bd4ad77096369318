//! Shared helpers for client integration tests.
#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, sleep, timeout};
use zk_client::{ClientConfig, WatchedEvent};
use zk_test_harness::Ensemble;

pub const WAIT: Duration = Duration::from_secs(5);

/// Client config for every member of `ensemble`, with timeouts short enough
/// for tests to observe expiry.
pub fn config(ensemble: &Ensemble) -> ClientConfig {
    config_with_timeout(ensemble, Duration::from_secs(10))
}

pub fn config_with_timeout(ensemble: &Ensemble, session_timeout: Duration) -> ClientConfig {
    ClientConfig::from_connect_string(&ensemble.connect_string())
        .expect("connect string")
        .with_session_timeout(session_timeout)
        .with_connect_timeout(Duration::from_secs(2))
}

pub async fn next_event(events: &mut UnboundedReceiver<WatchedEvent>) -> WatchedEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("event in time")
        .expect("watch channel open")
}

/// Reads events until one matches, returning everything seen up to and
/// including it.
pub async fn events_until(
    events: &mut UnboundedReceiver<WatchedEvent>,
    matches: impl Fn(&WatchedEvent) -> bool,
) -> Vec<WatchedEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = matches(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Asserts nothing arrives on `events` for `quiet`.
pub async fn assert_quiet(events: &mut UnboundedReceiver<WatchedEvent>, quiet: Duration) {
    if let Ok(Some(event)) = timeout(quiet, events.recv()).await {
        panic!("unexpected event {event:?}");
    }
}

pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}
