//! Periodic eviction of stale knock sessions and sequence rotation

use chrono::Utc;
use protocol::KnockEngine;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Rotate stale sequences and sweep the session table once per window
/// until `shutdown` flips to true
///
/// A sweep that has started always runs to completion before the task exits.
pub fn spawn_sweeper(engine: Arc<KnockEngine>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let period = engine.window().length();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    let rotated = engine.refresh_states(now);
                    if rotated > 0 {
                        debug!("Rotated {} knock sequences", rotated);
                    }
                    let evicted = engine.sweep(now);
                    let active = engine.sessions().len();
                    if evicted > 0 || active > 0 {
                        debug!("Evicted {} knock sessions, {} active", evicted, active);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Session sweeper stopped");
                        return;
                    }
                }
            }
        }
    })
}
