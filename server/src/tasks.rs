//! Background Tasks
//!
//! The active-rooms set can accumulate ids whose room record already
//! expired (TTL) or whose deletion raced a crash. A periodic sweep keeps
//! the set honest so scans and dashboards don't see ghost rooms.

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::api::AppState;
use crate::store::StoreError;

/// Spawn the periodic stale-room sweeper.
pub fn spawn_room_sweeper(state: AppState) {
    tokio::spawn(async move {
        info!("Room sweeper started");
        let mut timer = tokio::time::interval(state.config.sweep_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            if let Err(e) = sweep(&state).await {
                warn!(error = %e, "Room sweep failed");
            }
        }
    });
}

/// One sweep pass: drop active-set entries with no backing record.
pub async fn sweep(state: &AppState) -> Result<usize, StoreError> {
    let ids = state.rooms.active_rooms().await?;
    let mut pruned = 0usize;
    for id in ids {
        if state.rooms.exists(&id).await? {
            continue;
        }
        state.rooms.deregister(&id).await?;
        state.signals.clear_room(&id);
        state.playback_reports.clear(&id);
        pruned += 1;
    }
    if pruned > 0 {
        info!(pruned, "Pruned stale room ids");
    }
    Ok(pruned)
}
