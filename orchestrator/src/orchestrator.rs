//! オーケストレーターコンテキスト
//!
//! プロセス起動時に1度だけ構築し、ルーティング・完了報告・メトリクス参照・
//! 管理操作の窓口として参照を渡して使う。テストでは毎回新しいインスタンスを作る。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::balancer::{RequestLease, Router};
use crate::breaker::{BreakerPermit, BreakerSnapshot, CircuitBreakerRegistry};
use crate::clock::{Clock, SystemClock};
use crate::common::error::OrchestratorResult;
use crate::config::OrchestratorConfig;
use crate::metrics::{DetailedMetrics, GlobalMetrics, MetricsAggregator, RequestOutcome};
use crate::queue::{AdmissionQueue, QueueSnapshot};
use crate::registry::ServerRegistry;
use crate::types::ServerModelKey;

/// オーケストレーター
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    router: Router,
}

impl Orchestrator {
    /// システム時刻で構築する
    pub fn new(config: OrchestratorConfig, registry: ServerRegistry) -> OrchestratorResult<Self> {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    /// 時刻ソースを指定して構築する
    pub fn with_clock(
        config: OrchestratorConfig,
        registry: ServerRegistry,
        clock: Arc<dyn Clock>,
    ) -> OrchestratorResult<Self> {
        config.validate()?;
        let router = Router::new(
            registry,
            CircuitBreakerRegistry::new(config.breaker, Arc::clone(&clock)),
            MetricsAggregator::new(config.metrics, clock),
            AdmissionQueue::new(config.queue),
        );
        info!(
            failure_threshold = config.breaker.failure_threshold,
            cooldown_secs = config.breaker.cooldown.as_secs(),
            bucket_secs = config.metrics.bucket_duration.as_secs(),
            bucket_count = config.metrics.bucket_count,
            queue_capacity = config.queue.capacity,
            "Orchestrator initialized"
        );
        Ok(Self { config, router })
    }

    /// 設定
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// サーバーレジストリ
    pub fn registry(&self) -> &ServerRegistry {
        &self.router.registry
    }

    /// ルーター
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// ブレーカーレジストリ
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.router.breakers
    }

    /// メトリクスアグリゲーター
    pub fn metrics(&self) -> &MetricsAggregator {
        &self.router.metrics
    }

    /// アドミッションキュー
    pub fn queue(&self) -> &AdmissionQueue {
        &self.router.queue
    }

    // ---- routing ----

    /// モデルに対する送信先を選び、キュー枠を確保する
    pub fn route(&self, model: &str) -> OrchestratorResult<RequestLease> {
        self.router.route(model)
    }

    /// 送信先を選び、送出済み（inFlight）のleaseを返す
    pub fn begin(&self, model: &str) -> OrchestratorResult<RequestLease> {
        let mut lease = self.router.route(model)?;
        lease.dispatch();
        Ok(lease)
    }

    /// 指定キーに対して受け入れを試みる
    pub fn admit(&self, key: &ServerModelKey) -> OrchestratorResult<RequestLease> {
        self.router.admit(key)
    }

    /// 完了結果をブレーカーとメトリクスへ報告する（`RequestLease::into_key` 後に使用）
    ///
    /// 許可種別を持たないため、HalfOpen中に届いた結果はすべてプローブ結果として扱う。
    /// Closed中に受け入れたリクエストの結果でHalfOpenを閉じないようにするには
    /// `RequestLease::into_parts` と `report_permit_outcome` を使う。
    pub fn report_outcome(&self, key: &ServerModelKey, outcome: RequestOutcome) {
        self.router.breakers.record_outcome(
            key,
            outcome.is_success(),
            Duration::from_millis(outcome.latency_ms),
        );
        self.router.metrics.on_complete(key, outcome);
    }

    /// 許可種別を考慮して完了結果を報告する（`RequestLease::into_parts` 後に使用）
    pub fn report_permit_outcome(
        &self,
        key: &ServerModelKey,
        permit: BreakerPermit,
        outcome: RequestOutcome,
    ) {
        self.router.breakers.record_permit_outcome(
            key,
            permit,
            outcome.is_success(),
            Duration::from_millis(outcome.latency_ms),
        );
        self.router.metrics.on_complete(key, outcome);
    }

    /// キュー枠を返却する（対応する受け入れがなければfalse）
    pub fn release(&self, key: &ServerModelKey) -> bool {
        self.router.queue.release(key)
    }

    // ---- metrics ----

    /// 全体メトリクス
    pub fn global_metrics(&self) -> GlobalMetrics {
        self.router.metrics.global_snapshot()
    }

    /// サーバー×モデルの詳細メトリクス（未観測はNotFound）
    pub fn detailed_metrics(
        &self,
        server_id: &str,
        model: &str,
    ) -> OrchestratorResult<DetailedMetrics> {
        self.router
            .metrics
            .snapshot(&ServerModelKey::new(server_id, model))
    }

    /// 全キーの詳細メトリクス
    pub fn all_metrics(&self) -> BTreeMap<ServerModelKey, DetailedMetrics> {
        self.router.metrics.all_snapshots()
    }

    /// メトリクスとキューで検出した異常の合計
    pub fn anomalies(&self) -> u64 {
        self.router.metrics.anomalies() + self.router.queue.anomalies()
    }

    // ---- administration ----

    /// キューを一時停止
    pub fn pause_queue(&self, key: &ServerModelKey) {
        self.router.queue.pause(key);
    }

    /// キューを再開
    pub fn resume_queue(&self, key: &ServerModelKey) {
        self.router.queue.resume(key);
    }

    /// キューの確保数を0に戻す（戻り値はクリア前の確保数）
    pub fn clear_queue(&self, key: &ServerModelKey) -> usize {
        self.router.queue.clear(key)
    }

    /// キュー上限を変更（アイドル時のみ）
    pub fn configure_queue(
        &self,
        key: &ServerModelKey,
        capacity: usize,
    ) -> OrchestratorResult<()> {
        self.router.queue.configure(key, capacity)
    }

    /// ブレーカーを強制Open
    pub fn force_open_breaker(&self, key: &ServerModelKey) {
        self.router.breakers.force_open(key);
    }

    /// ブレーカーを強制Closed
    pub fn force_close_breaker(&self, key: &ServerModelKey) {
        self.router.breakers.force_close(key);
    }

    /// ブレーカーで許可されるか（拒否時は `BreakerOpen`）
    pub fn check_breaker(&self, key: &ServerModelKey) -> OrchestratorResult<()> {
        self.router.breakers.check(key)
    }

    /// ブレーカーのスナップショット
    pub fn breaker_snapshot(&self, key: &ServerModelKey) -> BreakerSnapshot {
        self.router.breakers.snapshot(key)
    }

    /// 全ブレーカーのスナップショット
    pub fn breaker_snapshots(&self) -> Vec<(ServerModelKey, BreakerSnapshot)> {
        self.router.breakers.snapshots()
    }

    /// キューのスナップショット
    pub fn queue_snapshot(&self, key: &ServerModelKey) -> QueueSnapshot {
        self.router.queue.snapshot(key)
    }

    /// 全キューのスナップショット
    pub fn queue_snapshots(&self) -> Vec<(ServerModelKey, QueueSnapshot)> {
        self.router.queue.snapshots()
    }
}
