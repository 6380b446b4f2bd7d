//! Tests for the background session sweep.

use calmline_db::{create_memory_pool, run_migrations};
use calmline_server::background::{sweep_once, SweepReport};
use calmline_server::config::Config;
use calmline_server::session::SessionInit;
use calmline_server::{AppState, Providers};
use calmline_types::CallerInfo;
use tokio::sync::mpsc;

fn state(config: &Config) -> AppState {
    let pool = create_memory_pool().expect("pool creation should succeed");
    run_migrations(&pool.get().expect("connection should succeed"))
        .expect("migrations should succeed");
    let providers = Providers::from_config(config, &pool).expect("providers should build");
    AppState::new(config, pool, providers)
}

fn init(call_id: &str) -> SessionInit {
    SessionInit {
        call_id: call_id.to_string(),
        stream_id: "MZ1".to_string(),
        tenant_id: "default".to_string(),
        caller: CallerInfo::default(),
        queue_capacity: 16,
    }
}

#[tokio::test]
async fn sweep_keeps_recent_sessions_and_flows() {
    let state = state(&Config::default());
    state
        .registry
        .create(init("CA1"), mpsc::channel(1).0)
        .unwrap();
    state.orchestrator.intake_flows().create("CA1", None).unwrap();

    assert_eq!(sweep_once(&state), SweepReport::default());
    assert_eq!(state.registry.len(), 1);
    assert_eq!(state.orchestrator.intake_flows().len(), 1);
}

#[tokio::test]
async fn sweep_removes_inactive_sessions_and_idle_flows() {
    let mut config = Config::default();
    config.session.inactivity_timeout_secs = 0;
    config.session.intake_idle_secs = 0;
    let state = state(&config);

    let session = state
        .registry
        .create(init("CA2"), mpsc::channel(1).0)
        .unwrap();
    state.orchestrator.intake_flows().create("CA2", None).unwrap();

    let report = sweep_once(&state);
    assert_eq!(
        report,
        SweepReport {
            intake_flows_purged: 1,
            sessions_removed: 1,
        }
    );
    assert!(state.registry.is_empty());
    assert!(session.is_closed());
    assert!(state.orchestrator.intake_flows().is_empty());

    assert_eq!(sweep_once(&state), SweepReport::default());
}

#[tokio::test]
async fn sweep_skips_flows_mid_turn() {
    let mut config = Config::default();
    config.session.intake_idle_secs = 0;
    let state = state(&config);

    let flow = state.orchestrator.intake_flows().create("CA3", None).unwrap();
    let _turn = flow.lock().await;

    assert_eq!(sweep_once(&state).intake_flows_purged, 0);
    assert_eq!(state.orchestrator.intake_flows().len(), 1);
}
