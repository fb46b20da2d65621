use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::persistence::{self as db, commands};
use crate::Result;

/// Delivered commands get `timeout_seconds * DELIVERY_GRACE_MULTIPLIER`
/// to come back acked or failed before the sweeper expires them.
pub const DELIVERY_GRACE_MULTIPLIER: u32 = 2;

#[derive(Debug, Default)]
pub struct CommandSweepReport {
    pub expired_delivered: usize,
    pub expired_pending: usize,
}

pub async fn command_sweep_loop(state: AppState) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.agent.sweep_interval_secs.max(1)));
    loop {
        interval.tick().await;
        match run_command_sweep(&state.db, state.agent.command_pending_ttl_secs).await {
            Ok(report) if report.expired_delivered + report.expired_pending > 0 => {
                info!(
                    expired_delivered = report.expired_delivered,
                    expired_pending = report.expired_pending,
                    "command sweep expired stale commands"
                );
            }
            Ok(_) => {}
            Err(err) => warn!(?err, "command sweep failed"),
        }
    }
}

pub async fn run_command_sweep(db: &db::Db, pending_ttl_secs: u64) -> Result<CommandSweepReport> {
    let mut report = CommandSweepReport::default();

    let delivered = commands::expire_overdue_delivered(db, DELIVERY_GRACE_MULTIPLIER).await?;
    report.expired_delivered = delivered.len();

    let pending_cutoff = Utc::now() - ChronoDuration::seconds(pending_ttl_secs.min(i64::MAX as u64) as i64);
    let pending = commands::expire_stale_pending(db, pending_cutoff).await?;
    report.expired_pending = pending.len();

    if report.expired_delivered > 0 {
        counter!("xpanel_commands_expired_total", "reason" => "delivery_timeout")
            .increment(report.expired_delivered as u64);
    }
    if report.expired_pending > 0 {
        counter!("xpanel_commands_expired_total", "reason" => "queue_ttl")
            .increment(report.expired_pending as u64);
    }

    Ok(report)
}
