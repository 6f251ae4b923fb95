//! Simulated repair progress.
//!
//! The fraction shown for an in-progress sub-task is elapsed time over its
//! estimated duration. It is recomputed on every read and by the ticker; it
//! never drives a status change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::db::DbHandle;
use super::models::{RepairStatus, Vehicle};
use super::ws::{WsMessage, WsSender, broadcast_message};

/// Completion fraction of one sub-task at `now`, in `[0, 1]`.
///
/// A zero duration counts as one minute. An in-progress sub-task without a
/// readable start time reports zero.
pub fn repair_progress(
    status: RepairStatus,
    start_time: Option<&str>,
    duration_minutes: u32,
    now: DateTime<Utc>,
) -> f64 {
    match status {
        RepairStatus::Pending => 0.0,
        RepairStatus::Done => 1.0,
        RepairStatus::InProgress => {
            let Some(start) = start_time.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            else {
                return 0.0;
            };
            let elapsed_ms = (now - start.with_timezone(&Utc)).num_milliseconds() as f64;
            let duration_ms = f64::from(duration_minutes.max(1)) * 60_000.0;
            (elapsed_ms / duration_ms).clamp(0.0, 1.0)
        }
    }
}

/// Fill in the progress of every sub-task of a vehicle as of `now`.
pub fn with_progress(mut vehicle: Vehicle, now: DateTime<Utc>) -> Vehicle {
    for repair in &mut vehicle.repairs {
        repair.progress = repair_progress(
            repair.status,
            repair.start_time.as_deref(),
            repair.duration_minutes,
            now,
        );
    }
    vehicle
}

/// Broadcast the progress of every in-progress sub-task once.
pub async fn broadcast_progress(
    db: &DbHandle,
    ws_tx: &WsSender,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let active = db.call(|db| db.list_active_repairs()).await?;
    for repair in &active {
        let progress = repair_progress(
            RepairStatus::InProgress,
            repair.start_time.as_deref(),
            repair.duration_minutes,
            now,
        );
        broadcast_message(
            ws_tx,
            &WsMessage::RepairProgress {
                vehicle_id: repair.vehicle_id.clone(),
                owner_id: repair.owner_id.clone(),
                position: repair.position,
                progress,
            },
        );
    }
    Ok(active.len())
}

/// Spawn the background ticker that animates progress for live subscribers.
///
/// Skips the database entirely while nobody is subscribed.
pub fn spawn_progress_ticker(db: DbHandle, ws_tx: WsSender, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if ws_tx.receiver_count() == 0 {
                continue;
            }
            if let Err(e) = broadcast_progress(&db, &ws_tx, Utc::now()).await {
                tracing::warn!(error = %e, "progress tick failed");
            }
        }
    })
}
