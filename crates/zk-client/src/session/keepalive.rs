// Keepalive: ping once half the negotiated timeout passes without hearing
// from the server. Sessions without watches are left to lapse.
use std::sync::Weak;
use std::time::Duration;

use super::Shared;

pub(super) async fn run(shared: Weak<Shared>, generation: u64, timeout: Duration) {
    let interval = timeout / 2;
    if interval.is_zero() {
        return;
    }
    loop {
        let Some(session) = shared.upgrade() else {
            return;
        };
        if !session.is_live(generation) {
            return;
        }
        let idle = session.idle();
        if idle < interval {
            drop(session);
            tokio::time::sleep(interval - idle).await;
            continue;
        }
        if session.watches.is_empty() {
            drop(session);
            tokio::time::sleep(interval).await;
            continue;
        }
        let answered = match tokio::time::timeout(interval, session.ping_on(generation)).await {
            Ok(Ok(())) => {
                tracing::trace!(generation, "keepalive answered");
                true
            }
            Ok(Err(err)) => {
                tracing::debug!(generation, error = %err, "keepalive failed");
                if !session.is_live(generation) {
                    return;
                }
                false
            }
            Err(_) => {
                tracing::debug!(generation, "keepalive unanswered");
                false
            }
        };
        drop(session);
        let pause = pause_after(answered, interval);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

/// An answered ping refreshed the idle clock, so the loop's own wait
/// applies. A stalled peer gets a full interval before the next check.
fn pause_after(answered: bool, interval: Duration) -> Duration {
    if answered { Duration::ZERO } else { interval }
}
