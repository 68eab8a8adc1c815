//! Periodic task runner shared by the poller tiers and health loops

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Spawn a task that awaits `tick()` every `interval` until `cancel` fires
///
/// Ticks never overlap: a slow tick delays the next one, and missed ticks
/// are skipped rather than bursted. The first tick fires one full interval
/// after spawning.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(task = name, ?interval, "periodic task started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    trace!(task = name, "tick");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tick() => {}
                    }
                }
            }
        }

        debug!(task = name, "periodic task stopped");
    })
}
