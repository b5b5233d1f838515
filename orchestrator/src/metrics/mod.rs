//! メトリクス集計
//!
//! サーバー×モデル単位で、リアルタイムカウンタ（inFlight / queued）、
//! 直近ウィンドウ・長期履歴のリングバッファ、レイテンシ分位点、累計を保持する。
//! カウンタはアトミック、ウィンドウはキー単位のロックで更新するため、
//! 異なるキー同士が競合することはない。

pub mod percentile;
pub mod types;
pub(crate) mod window;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::common::error::{OrchestratorError, OrchestratorResult};
use crate::config::MetricsConfig;
use crate::types::ServerModelKey;

pub use percentile::{LatencyHistogram, Percentiles};
pub use types::{
    DetailedMetrics, GlobalMetrics, LifetimeTotals, ModelTpsState, OutcomeKind, RequestOutcome,
    RouteStats, WindowBucketSnapshot,
};
use window::{SlidingWindow, WindowSummary};

/// 0未満にならないようにデクリメントする（0だった場合はfalse）
pub(crate) fn decrement_clamped(counter: &AtomicU64) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
            value.checked_sub(1)
        })
        .is_ok()
}

#[derive(Debug)]
struct KeyStats {
    recent: SlidingWindow,
    history: SlidingWindow,
    totals: LifetimeTotals,
    tps: ModelTpsState,
    last_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct KeyMetrics {
    in_flight: AtomicU64,
    queued: AtomicU64,
    anomalies: AtomicU64,
    first_seen: DateTime<Utc>,
    stats: Mutex<KeyStats>,
}

impl KeyMetrics {
    fn new(config: &MetricsConfig, now: DateTime<Utc>) -> Self {
        Self {
            in_flight: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            first_seen: now,
            stats: Mutex::new(KeyStats {
                recent: SlidingWindow::new(config.bucket_duration, config.bucket_count, true),
                history: SlidingWindow::new(
                    config.history_bucket_duration,
                    config.history_bucket_count,
                    false,
                ),
                totals: LifetimeTotals::default(),
                tps: ModelTpsState::default(),
                last_completed_at: None,
            }),
        }
    }

    fn load(&self) -> u64 {
        self.in_flight
            .load(Ordering::Acquire)
            .saturating_add(self.queued.load(Ordering::Acquire))
    }
}

/// メトリクスアグリゲーター
#[derive(Clone)]
pub struct MetricsAggregator {
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    keys: Arc<DashMap<ServerModelKey, Arc<KeyMetrics>>>,
    anomalies: Arc<AtomicU64>,
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("config", &self.config)
            .field("keys", &self.keys.len())
            .field("anomalies", &self.anomalies.load(Ordering::Relaxed))
            .finish()
    }
}

impl MetricsAggregator {
    /// 新しいアグリゲーターを作成
    pub fn new(config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            keys: Arc::new(DashMap::new()),
            anomalies: Arc::new(AtomicU64::new(0)),
        }
    }

    fn existing(&self, key: &ServerModelKey) -> Option<Arc<KeyMetrics>> {
        self.keys.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn entry(&self, key: &ServerModelKey) -> Arc<KeyMetrics> {
        if let Some(metrics) = self.existing(key) {
            return metrics;
        }
        let now = self.clock.now();
        let metrics = self
            .keys
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyMetrics::new(&self.config, now)));
        Arc::clone(metrics.value())
    }

    fn report_anomaly(&self, key: &ServerModelKey, metrics: Option<&KeyMetrics>, what: &str) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = metrics {
            metrics.anomalies.fetch_add(1, Ordering::Relaxed);
        }
        warn!(key = %key, anomaly = what, "Metrics counter anomaly, ignoring");
    }

    fn window_secs(&self) -> f64 {
        self.config.window_duration().as_secs_f64()
    }

    /// 受け入れ済み・未送出として記録（queued++）
    pub fn on_enqueue(&self, key: &ServerModelKey) {
        self.entry(key).queued.fetch_add(1, Ordering::AcqRel);
    }

    /// 未送出から外す（queued--、0なら異常として記録）
    pub fn on_dequeue(&self, key: &ServerModelKey) {
        let Some(metrics) = self.existing(key) else {
            self.report_anomaly(key, None, "dequeue_unknown_key");
            return;
        };
        if !decrement_clamped(&metrics.queued) {
            self.report_anomaly(key, Some(metrics.as_ref()), "dequeue_without_enqueue");
        }
    }

    /// 処理開始（inFlight++）
    pub fn on_admit(&self, key: &ServerModelKey) {
        self.entry(key).in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// 処理完了（inFlight-- とウィンドウ更新）
    ///
    /// 対応するon_admitがない完了は何も更新せず、異常として記録する。
    pub fn on_complete(&self, key: &ServerModelKey, outcome: RequestOutcome) {
        let Some(metrics) = self.existing(key) else {
            self.report_anomaly(key, None, "complete_unknown_key");
            return;
        };
        if !decrement_clamped(&metrics.in_flight) {
            self.report_anomaly(key, Some(metrics.as_ref()), "complete_without_admit");
            return;
        }
        let now = self.clock.now();
        let mut stats = metrics.stats.lock();
        stats.recent.record(now, &outcome);
        stats.history.record(now, &outcome);
        stats.totals.record(&outcome);
        if outcome.is_success() {
            stats.tps.update_tps(outcome.tokens, outcome.latency_ms);
        }
        stats.last_completed_at = Some(now);
    }

    /// キーを観測済みか
    pub fn contains(&self, key: &ServerModelKey) -> bool {
        self.keys.contains_key(key)
    }

    /// 処理中リクエスト数
    pub fn in_flight(&self, key: &ServerModelKey) -> u64 {
        self.existing(key)
            .map(|m| m.in_flight.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// 未送出リクエスト数
    pub fn queued(&self, key: &ServerModelKey) -> u64 {
        self.existing(key)
            .map(|m| m.queued.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// 検出した異常の総数（未知キー分を含む）
    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    /// ランキング用の統計（未観測キーは既定値）
    pub fn route_stats(&self, key: &ServerModelKey) -> RouteStats {
        let Some(metrics) = self.existing(key) else {
            return RouteStats::default();
        };
        let summary = metrics.stats.lock().recent.summary(self.clock.now());
        if summary.requests == 0 {
            return RouteStats {
                load: metrics.load(),
                ..RouteStats::default()
            };
        }
        RouteStats {
            success_rate: summary.success_rate(),
            p95_ms: summary.histogram.quantile(0.95),
            load: metrics.load(),
        }
    }

    fn detailed(
        &self,
        key: &ServerModelKey,
        metrics: &KeyMetrics,
        now: DateTime<Utc>,
    ) -> DetailedMetrics {
        let stats = metrics.stats.lock();
        let summary = stats.recent.summary(now);
        DetailedMetrics {
            key: key.clone(),
            in_flight: metrics.in_flight.load(Ordering::Acquire),
            queued: metrics.queued.load(Ordering::Acquire),
            windows: stats.recent.buckets(now),
            history: stats.history.buckets(now),
            percentiles: summary.histogram.percentiles(),
            success_rate: summary.success_rate(),
            throughput: summary.requests as f64 / self.window_secs(),
            avg_tokens_per_request: summary.avg_tokens_per_request(),
            average_latency_ms: summary.average_latency_ms(),
            tokens_per_second: stats.tps.tps_ema,
            totals: stats.totals,
            anomalies: metrics.anomalies.load(Ordering::Relaxed),
            first_seen: metrics.first_seen,
            last_completed_at: stats.last_completed_at,
        }
    }

    /// キー単位の詳細メトリクス（未観測キーはNotFound）
    pub fn snapshot(&self, key: &ServerModelKey) -> OrchestratorResult<DetailedMetrics> {
        let metrics = self
            .existing(key)
            .ok_or_else(|| OrchestratorError::NotFound(key.clone()))?;
        Ok(self.detailed(key, &metrics, self.clock.now()))
    }

    /// 全キーの詳細メトリクス（キー順）
    pub fn all_snapshots(&self) -> BTreeMap<ServerModelKey, DetailedMetrics> {
        let now = self.clock.now();
        let entries: Vec<(ServerModelKey, Arc<KeyMetrics>)> = self
            .keys
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        entries
            .into_iter()
            .map(|(key, metrics)| {
                let detailed = self.detailed(&key, &metrics, now);
                (key, detailed)
            })
            .collect()
    }

    /// 全キーの集計（要求時に計算）
    pub fn global_snapshot(&self) -> GlobalMetrics {
        let now = self.clock.now();
        let entries: Vec<Arc<KeyMetrics>> = self
            .keys
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut summary = WindowSummary::default();
        let mut totals = LifetimeTotals::default();
        let mut total_in_flight = 0u64;
        let mut total_queued = 0u64;
        for metrics in &entries {
            total_in_flight += metrics.in_flight.load(Ordering::Acquire);
            total_queued += metrics.queued.load(Ordering::Acquire);
            let stats = metrics.stats.lock();
            summary.merge(&stats.recent.summary(now));
            totals.add(&stats.totals);
        }

        GlobalMetrics {
            keys: entries.len(),
            total_in_flight,
            total_queued,
            recent_requests: summary.requests,
            recent_successes: summary.successes,
            recent_failures: summary.failures,
            success_rate: summary.success_rate(),
            throughput: summary.requests as f64 / self.window_secs(),
            avg_tokens_per_request: summary.avg_tokens_per_request(),
            average_latency_ms: summary.average_latency_ms(),
            percentiles: summary.histogram.percentiles(),
            totals,
            anomalies: self.anomalies(),
            generated_at: now,
        }
    }
}
