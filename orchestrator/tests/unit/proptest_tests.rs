//! Property-based tests using proptest

use proptest::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use llm_orchestrator::clock::ManualClock;
use llm_orchestrator::config::{MetricsConfig, QueueConfig};
use llm_orchestrator::metrics::{LatencyHistogram, MetricsAggregator, ModelTpsState};
use llm_orchestrator::queue::AdmissionQueue;
use llm_orchestrator::{RequestOutcome, ServerModelKey};

fn key() -> ServerModelKey {
    ServerModelKey::new("a", "m")
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Enqueue,
    Dequeue,
    Admit,
    Complete(bool, u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Enqueue),
        Just(Op::Dequeue),
        Just(Op::Admit),
        (any::<bool>(), 0u64..5_000).prop_map(|(ok, ms)| Op::Complete(ok, ms)),
    ]
}

fn outcome(success: bool, latency_ms: u64) -> RequestOutcome {
    if success {
        RequestOutcome::success(latency_ms, 10)
    } else {
        RequestOutcome::failure(latency_ms)
    }
}

// ---------------------------------------------------------------------------
// Realtime counters
// ---------------------------------------------------------------------------

proptest! {
    /// 任意の操作列でinFlight / queuedが負にならず、モデルとして数えた値と一致する
    #[test]
    fn counters_never_go_negative(ops in prop::collection::vec(op(), 0..200)) {
        let aggregator = MetricsAggregator::new(
            MetricsConfig::default(),
            Arc::new(ManualClock::default()),
        );
        let (mut in_flight, mut queued) = (0u64, 0u64);
        for op in ops {
            match op {
                Op::Enqueue => {
                    aggregator.on_enqueue(&key());
                    queued += 1;
                }
                Op::Dequeue => {
                    aggregator.on_dequeue(&key());
                    queued = queued.saturating_sub(1);
                }
                Op::Admit => {
                    aggregator.on_admit(&key());
                    in_flight += 1;
                }
                Op::Complete(ok, ms) => {
                    aggregator.on_complete(&key(), outcome(ok, ms));
                    in_flight = in_flight.saturating_sub(1);
                }
            }
            prop_assert_eq!(aggregator.in_flight(&key()), in_flight);
            prop_assert_eq!(aggregator.queued(&key()), queued);
        }
    }

    /// 成功率は常に[0,1]で、NaNにならない
    #[test]
    fn success_rate_is_bounded(results in prop::collection::vec((any::<bool>(), 0u64..10_000), 0..100)) {
        let aggregator = MetricsAggregator::new(
            MetricsConfig::default(),
            Arc::new(ManualClock::default()),
        );
        aggregator.on_enqueue(&key());
        for (ok, ms) in &results {
            aggregator.on_admit(&key());
            aggregator.on_complete(&key(), outcome(*ok, *ms));
        }
        let snapshot = aggregator.snapshot(&key()).unwrap();
        prop_assert!(!snapshot.success_rate.is_nan());
        prop_assert!((0.0..=1.0).contains(&snapshot.success_rate));
        let global = aggregator.global_snapshot();
        prop_assert!((0.0..=1.0).contains(&global.success_rate));
    }

    /// ウィンドウより古い書き込みはスナップショットに現れない
    #[test]
    fn expired_writes_never_count(
        offsets in prop::collection::vec(0u64..300_000, 1..50),
        extra in 0u64..120_000,
    ) {
        let clock = Arc::new(ManualClock::default());
        let aggregator = MetricsAggregator::new(MetricsConfig::default(), clock.clone());
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        for offset in &sorted {
            clock.set(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
            clock.advance(Duration::from_millis(*offset));
            aggregator.on_admit(&key());
            aggregator.on_complete(&key(), RequestOutcome::success(10, 1));
        }
        // 問い合わせ時刻は最後の書き込み以降
        let query_at = sorted[sorted.len() - 1] + extra;
        clock.set(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
        clock.advance(Duration::from_millis(query_at));

        let bucket_ms = 10_000u64;
        let now_epoch = query_at / bucket_ms;
        let expected = sorted
            .iter()
            .filter(|offset| {
                let epoch = *offset / bucket_ms;
                epoch <= now_epoch && epoch + 6 > now_epoch
            })
            .count() as u64;
        let snapshot = aggregator.snapshot(&key()).unwrap();
        let counted: u64 = snapshot.windows.iter().map(|b| b.requests).sum();
        prop_assert_eq!(counted, expected);
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    /// 受け入れ後に送出して完了
    Served(bool, u64),
    /// 受け入れ後、送出前に取り消し
    Cancelled,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (any::<bool>(), 0u64..5_000).prop_map(|(ok, ms)| Step::Served(ok, ms)),
        Just(Step::Cancelled),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// 複数スレッドから並行に受け入れ・完了・返却しても、カウンタは
    /// 同時実行数を超えず（負方向へのラップなし）、最終的に0へ戻る
    #[test]
    fn concurrent_lifecycles_return_counters_to_zero(
        capacity in 1usize..4,
        workers in prop::collection::vec(prop::collection::vec(step(), 0..40), 2..6),
    ) {
        let aggregator = MetricsAggregator::new(
            MetricsConfig::default(),
            Arc::new(ManualClock::default()),
        );
        let queue = AdmissionQueue::new(QueueConfig { capacity });
        let served = AtomicU64::new(0);
        let violations = AtomicU64::new(0);
        let bound = workers.len() as u64;

        std::thread::scope(|scope| {
            for steps in &workers {
                let (aggregator, queue) = (&aggregator, &queue);
                let (served, violations) = (&served, &violations);
                scope.spawn(move || {
                    for step in steps {
                        if !queue.try_admit(&key()).is_admitted() {
                            continue;
                        }
                        aggregator.on_enqueue(&key());
                        aggregator.on_dequeue(&key());
                        if let Step::Served(ok, ms) = *step {
                            aggregator.on_admit(&key());
                            aggregator.on_complete(&key(), outcome(ok, ms));
                            served.fetch_add(1, Ordering::Relaxed);
                        }
                        queue.release(&key());

                        if aggregator.in_flight(&key()) > bound
                            || aggregator.queued(&key()) > bound
                            || queue.depth(&key()) > capacity
                        {
                            violations.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        prop_assert_eq!(violations.load(Ordering::Relaxed), 0);
        prop_assert_eq!(aggregator.in_flight(&key()), 0);
        prop_assert_eq!(aggregator.queued(&key()), 0);
        prop_assert_eq!(queue.depth(&key()), 0);
        prop_assert_eq!(aggregator.anomalies(), 0);
        prop_assert_eq!(queue.anomalies(), 0);
        prop_assert_eq!(
            aggregator.global_snapshot().totals.requests,
            served.load(Ordering::Relaxed)
        );
    }
}

// ---------------------------------------------------------------------------
// Admission queue
// ---------------------------------------------------------------------------

proptest! {
    /// 任意の受け入れ・返却の列で確保数は0以上かつ上限以下
    #[test]
    fn queue_depth_stays_within_bounds(
        capacity in 1usize..8,
        ops in prop::collection::vec(any::<bool>(), 0..200),
    ) {
        let queue = AdmissionQueue::new(QueueConfig { capacity });
        for admit in ops {
            if admit {
                queue.try_admit(&key());
            } else {
                queue.release(&key());
            }
            let depth = queue.depth(&key());
            prop_assert!(depth <= capacity, "depth {} > capacity {}", depth, capacity);
        }
    }
}

// ---------------------------------------------------------------------------
// Percentile estimation
// ---------------------------------------------------------------------------

proptest! {
    /// p50 <= p95 <= p99 かつ観測範囲内
    #[test]
    fn percentiles_are_monotonic(samples in prop::collection::vec(0u64..1_000_000, 1..500)) {
        let mut histogram = LatencyHistogram::default();
        for sample in &samples {
            histogram.record(*sample);
        }
        let p = histogram.percentiles();
        let min = *samples.iter().min().unwrap() as f64;
        let max = *samples.iter().max().unwrap() as f64;
        prop_assert!(p.p50 <= p.p95, "p50 {} > p95 {}", p.p50, p.p95);
        prop_assert!(p.p95 <= p.p99, "p95 {} > p99 {}", p.p95, p.p99);
        prop_assert!(p.p50 >= min && p.p99 <= max);
    }

    /// 任意の(output_tokens, duration_ms)でEMAが非負
    #[test]
    fn tps_ema_is_non_negative(
        tokens in 0u64..10_000,
        dur in 0u64..100_000,
    ) {
        let mut state = ModelTpsState::default();
        state.update_tps(tokens, dur);
        if let Some(ema) = state.tps_ema {
            prop_assert!(ema >= 0.0, "EMA was negative: {}", ema);
        }
    }
}
