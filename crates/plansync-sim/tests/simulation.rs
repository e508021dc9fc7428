//! End-to-end simulator runs

use plansync_core::SyncStatus;
use plansync_sim::{run_simulator, SimulatorConfig, SimulatorError};
use plansync_test_utils::fast_config;
use proptest::prelude::*;

fn config(sessions: usize, rounds: u64, seed: u64, failure_rate: f64) -> SimulatorConfig {
    SimulatorConfig {
        sessions,
        rounds,
        seed,
        failure_rate,
        sync: fast_config(),
    }
}

#[tokio::test]
async fn reliable_store_passes_and_makes_progress() {
    let report = run_simulator(config(3, 80, 7, 0.0)).await.unwrap();

    assert!(report.passed(), "{}", report.generate_text());
    assert!(report.stats.saves_succeeded > 0);
    assert_eq!(report.stats.injected_faults, 0);
    assert_eq!(report.stats.final_revision, 1 + report.stats.accepted_writes);
    assert_eq!(report.final_statuses.len(), 3);
    assert!(!report.stats.save_errors.contains_key("NETWORK"));
}

#[tokio::test]
async fn flaky_store_still_holds_invariants() {
    let report = run_simulator(config(4, 120, 1234, 0.25)).await.unwrap();

    assert!(report.passed(), "{}", report.generate_text());
    assert!(report.stats.injected_faults > 0);
    assert!(report.stats.save_conflicts > 0);
}

#[tokio::test]
async fn single_session_never_conflicts() {
    let report = run_simulator(config(1, 60, 3, 0.0)).await.unwrap();

    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(report.stats.save_conflicts, 0);
    assert!(report.stats.resolutions.is_empty());
    assert_ne!(report.final_statuses[0], SyncStatus::Conflict);
}

#[tokio::test]
async fn invalid_config_is_refused_before_running() {
    let err = run_simulator(config(0, 10, 1, 0.0)).await.unwrap_err();

    assert!(matches!(err, SimulatorError::Config(_)));
}

#[test]
fn report_serializes_to_json() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let report = runtime.block_on(run_simulator(config(2, 10, 5, 0.0))).unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

    assert_eq!(json["config"]["sessions"], 2);
    assert_eq!(json["violations"], serde_json::json!([]));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn any_seed_holds_invariants(seed in any::<u64>(), sessions in 1usize..5) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let report = runtime
            .block_on(run_simulator(config(sessions, 30, seed, 0.15)))
            .unwrap();
        prop_assert!(report.passed(), "{}", report.generate_text());
    }
}
