//! ロードバランサーモジュール
//!
//! 要求されたモデルに対し、健全なサーバーの中からブレーカーで許可され、
//! キュー枠を確保できた候補を1つ選ぶ。
//!
//! ルーターは永続状態を持たず、毎回レジストリ・ブレーカー・メトリクスの
//! スナップショットから判断する。キュー枠の確保はランキング順に試行するため、
//! 列挙から選択までの間に深さが変わっても上限を超えることはない。

pub mod lease;
pub mod types;

pub use lease::RequestLease;
pub use types::{compare_candidates, rank_candidates, Candidate, RejectionCounts};

use tracing::debug;

use crate::breaker::{BreakerPermit, CircuitBreakerRegistry};
use crate::common::error::{OrchestratorError, OrchestratorResult};
use crate::metrics::MetricsAggregator;
use crate::queue::{AdmissionDecision, AdmissionQueue};
use crate::registry::ServerRegistry;
use crate::types::ServerModelKey;

/// ルーター
///
/// 各コンポーネントはArcで共有されるため、クローンは安価。
#[derive(Debug, Clone)]
pub struct Router {
    pub(crate) registry: ServerRegistry,
    pub(crate) breakers: CircuitBreakerRegistry,
    pub(crate) metrics: MetricsAggregator,
    pub(crate) queue: AdmissionQueue,
}

impl Router {
    /// 新しいルーターを作成
    pub fn new(
        registry: ServerRegistry,
        breakers: CircuitBreakerRegistry,
        metrics: MetricsAggregator,
        queue: AdmissionQueue,
    ) -> Self {
        Self {
            registry,
            breakers,
            metrics,
            queue,
        }
    }

    /// ブレーカーで許可された候補をランキング順に列挙する
    ///
    /// 健全なサーバーが1台もモデルを提供していない場合は `NoCapableServers`。
    pub fn candidates(
        &self,
        model: &str,
    ) -> OrchestratorResult<(Vec<Candidate>, RejectionCounts)> {
        let servers: Vec<(usize, ServerModelKey)> = self
            .registry
            .list()
            .into_iter()
            .enumerate()
            .filter(|(_, server)| server.is_healthy() && server.serves(model))
            .map(|(index, server)| (index, server.key_for(model)))
            .collect();
        if servers.is_empty() {
            return Err(OrchestratorError::NoCapableServers(model.to_string()));
        }

        let mut rejections = RejectionCounts::default();
        let mut candidates = Vec::with_capacity(servers.len());
        for (registration_index, key) in servers {
            if !self.breakers.is_eligible(&key) {
                rejections.breaker_open += 1;
                continue;
            }
            let stats = self.metrics.route_stats(&key);
            candidates.push(Candidate {
                key,
                registration_index,
                stats,
            });
        }
        rank_candidates(&mut candidates);
        Ok((candidates, rejections))
    }

    /// 候補を選び、キュー枠を確保したleaseを返す
    pub fn route(&self, model: &str) -> OrchestratorResult<RequestLease> {
        let (candidates, mut rejections) = self.candidates(model)?;

        for candidate in candidates {
            let key = candidate.key;
            // 判定後に他リクエストがプローブ枠を取った場合はここで弾かれる
            let Some(permit) = self.breakers.try_acquire(&key) else {
                rejections.breaker_open += 1;
                continue;
            };
            match self.queue.try_admit(&key) {
                AdmissionDecision::Admitted => {
                    self.metrics.on_enqueue(&key);
                    debug!(
                        model = %model,
                        key = %key,
                        probe = permit == BreakerPermit::Probe,
                        success_rate = candidate.stats.success_rate,
                        p95_ms = candidate.stats.p95_ms,
                        load = candidate.stats.load,
                        "Routed request"
                    );
                    return Ok(RequestLease::new(self.clone(), key, permit));
                }
                AdmissionDecision::QueueFull => {
                    self.breakers.release_permit(&key, permit);
                    rejections.queue_full += 1;
                }
                AdmissionDecision::QueuePaused => {
                    self.breakers.release_permit(&key, permit);
                    rejections.queue_paused += 1;
                }
            }
        }

        debug!(
            model = %model,
            breaker_open = rejections.breaker_open,
            queue_full = rejections.queue_full,
            queue_paused = rejections.queue_paused,
            "No eligible target"
        );
        Err(OrchestratorError::NoEligibleTarget {
            model: model.to_string(),
            breaker_open: rejections.breaker_open,
            queue_full: rejections.queue_full,
            queue_paused: rejections.queue_paused,
        })
    }

    /// 指定キーに対してキュー枠を確保する
    ///
    /// 未登録サーバーは `ServerNotFound`、モデル未提供または非健全なサーバーは
    /// `NoCapableServers`。
    pub fn admit(&self, key: &ServerModelKey) -> OrchestratorResult<RequestLease> {
        let server = self
            .registry
            .get(&key.server_id)
            .ok_or_else(|| OrchestratorError::ServerNotFound(key.server_id.clone()))?;
        if !server.is_healthy() || !server.serves(&key.model) {
            return Err(OrchestratorError::NoCapableServers(key.model.clone()));
        }
        let permit = self
            .breakers
            .try_acquire(key)
            .ok_or_else(|| OrchestratorError::BreakerOpen(key.clone()))?;
        if let Err(err) = self.queue.try_admit(key).into_result(key) {
            self.breakers.release_permit(key, permit);
            return Err(err);
        }
        self.metrics.on_enqueue(key);
        Ok(RequestLease::new(self.clone(), key.clone(), permit))
    }
}
