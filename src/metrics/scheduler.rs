use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Aggregator, Resolution};

/// Spawns the tick driver. It wakes at every minute boundary and hands it to
/// [`Aggregator::run_boundary`], which runs the minute tick and, at :00 and
/// 00:00 UTC, the hour and day rollups after it.
///
/// The driver stops when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn(aggregator: Arc<Aggregator>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(tick_loop(aggregator, shutdown))
}

async fn tick_loop(aggregator: Arc<Aggregator>, mut shutdown: watch::Receiver<bool>) {
    let mut next = Resolution::Minute.next_boundary(Utc::now());
    tracing::info!(first_tick = %next, "tick driver started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(until(next, Utc::now())) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let lag = Utc::now() - next;
        if lag > Resolution::Minute.step() {
            tracing::warn!(tick = %next, lag_secs = lag.num_seconds(), "tick running behind schedule");
        }

        aggregator.run_boundary(next).await;
        next = advance(next);
    }

    tracing::info!("tick driver stopped");
}

/// The boundary after `fired`. Never derived from the wall clock, so a
/// driver that fell behind works through every missed boundary in turn.
fn advance(fired: DateTime<Utc>) -> DateTime<Utc> {
    fired + Resolution::Minute.step()
}

/// Time left from `now` until `at`; zero when `at` has already passed.
fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}
