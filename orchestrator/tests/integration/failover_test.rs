//! 障害サーバーの切り離しと回復のIntegration Test
//!
//! - 連続失敗で A:m のブレーカーがOpenになり、クールダウン中は B:m のみが選ばれる
//! - クールダウン経過後はプローブ1件のみ許可され、成功でClosedに戻る
//! - プローブ失敗でクールダウンが倍になる

use std::time::Duration;

use llm_orchestrator::breaker::CircuitState;
use llm_orchestrator::config::OrchestratorConfig;
use llm_orchestrator::{OrchestratorError, RequestOutcome};

use crate::support::{key, orchestrator_with};

fn fail_five_times(orchestrator: &llm_orchestrator::Orchestrator) {
    for _ in 0..5 {
        let mut lease = orchestrator.admit(&key("A", "m")).expect("admit A");
        lease.dispatch();
        lease.complete(RequestOutcome::failure(250));
    }
}

#[test]
fn test_failing_server_is_excluded_until_cooldown() {
    let (orchestrator, clock) = orchestrator_with(&["A", "B"], "m", OrchestratorConfig::default());

    fail_five_times(&orchestrator);
    assert_eq!(
        orchestrator.breaker_snapshot(&key("A", "m")).state,
        CircuitState::Open
    );

    for _ in 0..20 {
        let lease = orchestrator.route("m").expect("route");
        assert_eq!(lease.key(), &key("B", "m"));
        lease.complete(RequestOutcome::success(100, 10));
        clock.advance(Duration::from_secs(1));
    }

    // クールダウン直前でもAには送られない
    clock.advance(Duration::from_secs(9));
    orchestrator.pause_queue(&key("B", "m"));
    match orchestrator.route("m").unwrap_err() {
        OrchestratorError::NoEligibleTarget {
            breaker_open,
            queue_paused,
            ..
        } => {
            assert_eq!(breaker_open, 1);
            assert_eq!(queue_paused, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_probe_success_restores_server() {
    let (orchestrator, clock) = orchestrator_with(&["A", "B"], "m", OrchestratorConfig::default());
    fail_five_times(&orchestrator);
    orchestrator.pause_queue(&key("B", "m"));

    clock.advance(Duration::from_secs(30));
    let probe = orchestrator.route("m").expect("probe");
    assert_eq!(probe.key(), &key("A", "m"));
    assert!(probe.is_probe());

    // プローブ実行中は2件目を通さない
    assert!(matches!(
        orchestrator.route("m"),
        Err(OrchestratorError::NoEligibleTarget { breaker_open: 1, .. })
    ));

    probe.complete(RequestOutcome::success(90, 12));
    let snapshot = orchestrator.breaker_snapshot(&key("A", "m"));
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(snapshot.opened_at.is_none());
}

#[test]
fn test_probe_failure_doubles_cooldown() {
    let (orchestrator, clock) = orchestrator_with(&["A", "B"], "m", OrchestratorConfig::default());
    fail_five_times(&orchestrator);
    orchestrator.pause_queue(&key("B", "m"));

    clock.advance(Duration::from_secs(30));
    let probe = orchestrator.route("m").expect("probe");
    // 応答なしで破棄されたプローブはタイムアウト失敗として扱われる
    drop(probe);

    let snapshot = orchestrator.breaker_snapshot(&key("A", "m"));
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.current_cooldown_ms, 60_000);

    clock.advance(Duration::from_secs(30));
    assert!(orchestrator.route("m").is_err());
    clock.advance(Duration::from_secs(30));
    assert_eq!(orchestrator.route("m").expect("second probe").key(), &key("A", "m"));
}

#[test]
fn test_force_close_bypasses_cooldown() {
    let (orchestrator, _) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    fail_five_times(&orchestrator);
    assert!(orchestrator.route("m").is_err());

    orchestrator.force_close_breaker(&key("A", "m"));
    assert_eq!(orchestrator.route("m").expect("route").key(), &key("A", "m"));
}
