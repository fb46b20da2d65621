use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::persistence::{self as db, nodes};
use crate::Result;

#[derive(Debug, Default)]
pub struct LivenessReport {
    pub marked_inactive: usize,
}

/// Flip nodes whose agents stopped heartbeating to inactive.
pub async fn liveness_loop(state: AppState) {
    let stale_after = state.agent.stale_after_secs.max(1);
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.agent.sweep_interval_secs.max(1)));
    loop {
        interval.tick().await;
        match run_liveness_sweep(&state.db, stale_after).await {
            Ok(report) if report.marked_inactive > 0 => {
                info!(
                    marked_inactive = report.marked_inactive,
                    "liveness sweep marked quiet nodes inactive"
                );
            }
            Ok(_) => {}
            Err(err) => warn!(?err, "liveness sweep failed"),
        }
    }
}

pub async fn run_liveness_sweep(db: &db::Db, stale_after_secs: u64) -> Result<LivenessReport> {
    let cutoff = Utc::now() - ChronoDuration::seconds(stale_after_secs.min(i64::MAX as u64) as i64);
    let ids = nodes::mark_stale_nodes_inactive(db, cutoff).await?;
    if !ids.is_empty() {
        counter!("xpanel_nodes_marked_inactive_total").increment(ids.len() as u64);
    }
    Ok(LivenessReport {
        marked_inactive: ids.len(),
    })
}
