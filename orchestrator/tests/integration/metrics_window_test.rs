//! 時間窓メトリクスのIntegration Test

use std::time::Duration;

use llm_orchestrator::config::OrchestratorConfig;
use llm_orchestrator::{OrchestratorError, RequestOutcome};

use crate::support::orchestrator_with;

#[test]
fn test_success_at_zero_is_gone_at_65s() {
    let (orchestrator, clock) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    orchestrator
        .begin("m")
        .unwrap()
        .complete(RequestOutcome::success(100, 10));

    clock.advance(Duration::from_secs(30));
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!(metrics.windows.iter().map(|b| b.requests).sum::<u64>(), 1);

    clock.advance(Duration::from_secs(35));
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!(metrics.windows.iter().map(|b| b.requests).sum::<u64>(), 0);
    assert_eq!(metrics.success_rate, 0.0);
    assert_eq!(metrics.percentiles.p99, 0.0);
    assert_eq!(orchestrator.global_metrics().recent_requests, 0);
}

#[test]
fn test_history_keeps_older_minutes() {
    let (orchestrator, clock) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    for _ in 0..3 {
        orchestrator
            .begin("m")
            .unwrap()
            .complete(RequestOutcome::success(100, 10));
        clock.advance(Duration::from_secs(60));
    }

    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!(metrics.history.len(), 60);
    assert_eq!(metrics.history.iter().map(|b| b.requests).sum::<u64>(), 3);
    assert_eq!(metrics.totals.requests, 3);
}

#[test]
fn test_clock_going_backward_does_not_break_snapshots() {
    let (orchestrator, clock) = orchestrator_with(&["A"], "m", OrchestratorConfig::default());
    clock.advance(Duration::from_secs(3600));
    orchestrator
        .begin("m")
        .unwrap()
        .complete(RequestOutcome::success(100, 10));

    clock.rewind(Duration::from_secs(45));
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!(metrics.windows.iter().map(|b| b.requests).sum::<u64>(), 0);

    orchestrator
        .begin("m")
        .unwrap()
        .complete(RequestOutcome::failure(50));
    let metrics = orchestrator.detailed_metrics("A", "m").unwrap();
    assert_eq!(metrics.windows.iter().map(|b| b.requests).sum::<u64>(), 1);
    assert_eq!(metrics.totals.requests, 2);
    assert!((0.0..=1.0).contains(&metrics.success_rate));
}

#[test]
fn test_global_metrics_aggregate_on_demand() {
    let (orchestrator, _) = orchestrator_with(&["A", "B"], "m", OrchestratorConfig::default());
    for (server, outcome) in [
        ("A", RequestOutcome::success(100, 30)),
        ("A", RequestOutcome::success(300, 10)),
        ("B", RequestOutcome::failure(1000)),
    ] {
        let mut lease = orchestrator
            .admit(&crate::support::key(server, "m"))
            .unwrap();
        lease.dispatch();
        lease.complete(outcome);
    }

    let global = orchestrator.global_metrics();
    assert_eq!(global.keys, 2);
    assert_eq!(global.recent_requests, 3);
    assert!((global.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(global.avg_tokens_per_request, 20.0);
    assert!(global.percentiles.p50 <= global.percentiles.p95);
    assert_eq!(global.percentiles.p99, 1000.0);

    assert!(matches!(
        orchestrator.detailed_metrics("C", "m"),
        Err(OrchestratorError::NotFound(_))
    ));
    assert_eq!(orchestrator.all_metrics().len(), 2);
}
