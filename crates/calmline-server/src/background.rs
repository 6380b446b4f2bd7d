//! Background tasks for the Calmline server.
//!
//! Includes:
//! - Purging intake flows that went idle mid-conversation.
//! - Tearing down sessions whose transport went quiet without a `stop`.

use crate::AppState;
use std::sync::Arc;
use tokio::time::sleep;

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub intake_flows_purged: usize,
    pub sessions_removed: usize,
}

/// Runs one sweep over the intake-flow table and the session registry.
pub fn sweep_once(state: &AppState) -> SweepReport {
    let intake_flows_purged = state
        .orchestrator
        .intake_flows()
        .purge_idle(state.settings.intake_idle());

    let mut sessions_removed = 0;
    for session_id in state
        .registry
        .idle_sessions(state.settings.inactivity_timeout())
    {
        if state.end_session(&session_id).is_some() {
            tracing::info!(session_id = %session_id, "removed inactive session");
            sessions_removed += 1;
        }
    }

    SweepReport {
        intake_flows_purged,
        sessions_removed,
    }
}

/// Starts the periodic sweep task. Runs until the process exits.
pub async fn start_sweep_task(state: Arc<AppState>) {
    let interval = state.settings.sweep_interval();
    tracing::info!(
        interval_secs = interval.as_secs(),
        intake_idle_secs = state.settings.intake_idle_secs,
        inactivity_timeout_secs = state.settings.inactivity_timeout_secs,
        "starting session sweep task"
    );

    loop {
        sleep(interval).await;
        let report = sweep_once(&state);
        if report != SweepReport::default() {
            tracing::info!(
                intake_flows_purged = report.intake_flows_purged,
                sessions_removed = report.sessions_removed,
                "sweep completed"
            );
        }
    }
}
