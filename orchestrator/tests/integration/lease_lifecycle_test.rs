//! RequestLeaseのライフサイクルのIntegration Test

use std::time::Duration;

use llm_orchestrator::breaker::{BreakerPermit, CircuitState};
use llm_orchestrator::config::OrchestratorConfig;
use llm_orchestrator::RequestOutcome;

use crate::support::{key, orchestrator_with};

#[test]
fn test_route_then_dispatch_moves_queued_to_in_flight() {
    let (orchestrator, _) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());

    let mut lease = orchestrator.route("m").unwrap();
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!((metrics.queued, metrics.in_flight), (1, 0));

    lease.dispatch();
    lease.dispatch();
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!((metrics.queued, metrics.in_flight), (0, 1));

    lease.complete(RequestOutcome::success(120, 50));
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!((metrics.queued, metrics.in_flight), (0, 0));
    assert_eq!(metrics.success_rate, 1.0);
    assert_eq!(metrics.avg_tokens_per_request, 50.0);
}

#[test]
fn test_completing_undispatched_lease_still_balances_counters() {
    let (orchestrator, _) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    orchestrator
        .route("m")
        .unwrap()
        .complete(RequestOutcome::failure(15));

    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!((metrics.queued, metrics.in_flight), (0, 0));
    assert_eq!(metrics.totals.failures, 1);
    assert_eq!(orchestrator.anomalies(), 0);
}

#[test]
fn test_dropped_lease_is_recorded_once_as_timeout() {
    let (orchestrator, _) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    {
        let _lease = orchestrator.begin("m").unwrap();
    }

    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!(metrics.in_flight, 0);
    assert_eq!(metrics.totals.requests, 1);
    assert_eq!(metrics.totals.timeouts, 1);
    assert_eq!(orchestrator.queue_snapshot(&key("A", "m")).depth, 0);
    assert_eq!(
        orchestrator.breaker_snapshot(&key("A", "m")).consecutive_failures,
        1
    );
}

#[test]
fn test_into_key_hands_over_completion() {
    let (orchestrator, _) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    let target = orchestrator.route("m").unwrap().into_key();

    // 自動完了は行われない
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!(metrics.in_flight, 1);
    assert_eq!(metrics.totals.requests, 0);

    orchestrator.report_outcome(&target, RequestOutcome::success(80, 20));
    assert!(orchestrator.release(&target));

    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!(metrics.in_flight, 0);
    assert_eq!(metrics.totals.successes, 1);
    assert_eq!(orchestrator.queue_snapshot(&target).depth, 0);
}

#[test]
fn test_report_without_admission_is_tolerated() {
    let (orchestrator, _) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    orchestrator.report_outcome(&key("A", "m"), RequestOutcome::success(10, 1));
    assert!(!orchestrator.release(&key("A", "m")));

    assert_eq!(orchestrator.anomalies(), 2);
    assert_eq!(orchestrator.global_metrics().total_in_flight, 0);
}

#[test]
fn test_manual_completion_keeps_permit_kind() {
    let (orchestrator, clock) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    let (target, permit) = orchestrator.route("m").unwrap().into_parts();
    assert_eq!(permit, BreakerPermit::Normal);

    orchestrator.force_open_breaker(&target);
    clock.advance(Duration::from_secs(30));
    assert_eq!(
        orchestrator.breaker_snapshot(&target).state,
        CircuitState::HalfOpen
    );

    // Closed中に受け入れたリクエストの成功ではHalfOpenを閉じない
    orchestrator.report_permit_outcome(&target, permit, RequestOutcome::success(40, 8));
    assert!(orchestrator.release(&target));
    assert_eq!(
        orchestrator.breaker_snapshot(&target).state,
        CircuitState::HalfOpen
    );

    let (probe_target, probe_permit) = orchestrator.route("m").unwrap().into_parts();
    assert_eq!(probe_permit, BreakerPermit::Probe);
    orchestrator.report_permit_outcome(
        &probe_target,
        probe_permit,
        RequestOutcome::success(40, 8),
    );
    assert!(orchestrator.release(&probe_target));

    assert_eq!(
        orchestrator.breaker_snapshot(&target).state,
        CircuitState::Closed
    );
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!((metrics.queued, metrics.in_flight), (0, 0));
    assert_eq!(metrics.totals.successes, 2);
    assert_eq!(orchestrator.anomalies(), 0);
}
