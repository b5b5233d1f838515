//! サーキットブレーカー
//!
//! サーバー×モデル単位で Closed / Open / HalfOpen を管理する。
//! Open → HalfOpen の遷移はクールダウン経過後の最初の読み取り時に行う（タイマーは持たない）。
//! 判定とプローブ枠の確保は `try_acquire` で同一ロック内に行うため、
//! HalfOpen中に許可されるプローブ数が上限を超えることはない。

pub mod types;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::common::error::{OrchestratorError, OrchestratorResult};
use crate::config::BreakerConfig;
use crate::types::ServerModelKey;

pub use types::{BreakerPermit, BreakerSnapshot, CircuitState};
use types::{BreakerEntry, Transition};

/// サーキットブレーカーのレジストリ
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Arc<DashMap<ServerModelKey, Arc<Mutex<BreakerEntry>>>>,
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("keys", &self.breakers.len())
            .finish()
    }
}

impl CircuitBreakerRegistry {
    /// 新しいレジストリを作成
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// 設定を取得
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn existing(&self, key: &ServerModelKey) -> Option<Arc<Mutex<BreakerEntry>>> {
        // シャードのガードはここで解放し、キー単位のロックだけを保持させる
        self.breakers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn entry(&self, key: &ServerModelKey) -> Arc<Mutex<BreakerEntry>> {
        if let Some(entry) = self.existing(key) {
            return entry;
        }
        let entry = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerEntry::new(&self.config))));
        Arc::clone(entry.value())
    }

    fn log_transition(&self, key: &ServerModelKey, transition: Transition, entry: &BreakerEntry) {
        match transition.to {
            CircuitState::Open => warn!(
                key = %key,
                from = transition.from.as_str(),
                consecutive_failures = entry.consecutive_failures,
                cooldown_ms = entry.current_cooldown.as_millis() as u64,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                key = %key,
                from = transition.from.as_str(),
                "Circuit breaker half-open, allowing probes"
            ),
            CircuitState::Closed => info!(
                key = %key,
                from = transition.from.as_str(),
                "Circuit breaker closed"
            ),
        }
    }

    /// リクエスト結果を反映する
    ///
    /// 未観測のキーはClosedとして作成される。HalfOpen中の結果はプローブ結果として扱い、
    /// Open中に届いた結果は状態遷移に使わない。
    pub fn record_outcome(&self, key: &ServerModelKey, success: bool, latency: Duration) {
        let entry = self.entry(key);
        let mut state = entry.lock();
        let now = self.clock.now();
        if let Some(transition) = state.refresh(now) {
            self.log_transition(key, transition, &state);
        }
        if state.state == CircuitState::Open {
            debug!(
                key = %key,
                success,
                latency_ms = latency.as_millis() as u64,
                "Ignoring outcome while circuit is open"
            );
            return;
        }
        if let Some(transition) = state.record(success, now, &self.config) {
            self.log_transition(key, transition, &state);
        }
    }

    /// 許可の種別を考慮して結果を反映する
    ///
    /// Closed中に通過したリクエストがHalfOpen移行後に完了した場合、
    /// その結果はプローブ結果として扱わない。
    pub fn record_permit_outcome(
        &self,
        key: &ServerModelKey,
        permit: BreakerPermit,
        success: bool,
        latency: Duration,
    ) {
        if permit == BreakerPermit::Probe {
            self.record_outcome(key, success, latency);
            return;
        }
        let Some(entry) = self.existing(key) else {
            self.record_outcome(key, success, latency);
            return;
        };
        let mut state = entry.lock();
        let now = self.clock.now();
        if let Some(transition) = state.refresh(now) {
            self.log_transition(key, transition, &state);
        }
        if state.state != CircuitState::Closed {
            debug!(
                key = %key,
                state = state.state.as_str(),
                success,
                "Ignoring non-probe outcome while circuit is not closed"
            );
            return;
        }
        if let Some(transition) = state.record(success, now, &self.config) {
            self.log_transition(key, transition, &state);
        }
    }

    /// ルーティング対象にできるか（未観測キーはClosed扱い）
    pub fn is_eligible(&self, key: &ServerModelKey) -> bool {
        let Some(entry) = self.existing(key) else {
            return true;
        };
        let mut state = entry.lock();
        if let Some(transition) = state.refresh(self.clock.now()) {
            self.log_transition(key, transition, &state);
        }
        state.is_eligible(&self.config)
    }

    /// HalfOpen中のプローブ枠を確保する（HalfOpen以外ではfalse）
    pub fn acquire_probe_slot(&self, key: &ServerModelKey) -> bool {
        let Some(entry) = self.existing(key) else {
            return false;
        };
        let mut state = entry.lock();
        if let Some(transition) = state.refresh(self.clock.now()) {
            self.log_transition(key, transition, &state);
        }
        if state.state != CircuitState::HalfOpen {
            return false;
        }
        matches!(
            state.try_acquire(&self.config),
            Some(BreakerPermit::Probe)
        )
    }

    /// 判定と（HalfOpen時の）プローブ枠確保を一括で行う
    pub fn try_acquire(&self, key: &ServerModelKey) -> Option<BreakerPermit> {
        let Some(entry) = self.existing(key) else {
            return Some(BreakerPermit::Normal);
        };
        let mut state = entry.lock();
        if let Some(transition) = state.refresh(self.clock.now()) {
            self.log_transition(key, transition, &state);
        }
        state.try_acquire(&self.config)
    }

    /// 結果を記録せずに許可を返却する（アドミッション失敗時など）
    pub fn release_permit(&self, key: &ServerModelKey, permit: BreakerPermit) {
        if permit != BreakerPermit::Probe {
            return;
        }
        if let Some(entry) = self.existing(key) {
            let mut state = entry.lock();
            if state.state == CircuitState::HalfOpen {
                state.release_probe();
            }
        }
    }

    /// 許可されない場合は `BreakerOpen` を返す
    pub fn check(&self, key: &ServerModelKey) -> OrchestratorResult<()> {
        if self.is_eligible(key) {
            Ok(())
        } else {
            Err(OrchestratorError::BreakerOpen(key.clone()))
        }
    }

    /// 現在の状態
    pub fn state(&self, key: &ServerModelKey) -> CircuitState {
        self.snapshot(key).state
    }

    /// 管理操作: 強制的にOpenにする
    pub fn force_open(&self, key: &ServerModelKey) {
        let entry = self.entry(key);
        let mut state = entry.lock();
        if let Some(transition) = state.force_open(self.clock.now()) {
            self.log_transition(key, transition, &state);
        }
        info!(key = %key, "Circuit breaker forced open");
    }

    /// 管理操作: 強制的にClosedに戻す（クールダウンもリセット）
    pub fn force_close(&self, key: &ServerModelKey) {
        let entry = self.entry(key);
        let mut state = entry.lock();
        if let Some(transition) = state.force_close(&self.config) {
            self.log_transition(key, transition, &state);
        }
        info!(key = %key, "Circuit breaker forced closed");
    }

    /// スナップショットを取得（未観測キーは初期状態）
    pub fn snapshot(&self, key: &ServerModelKey) -> BreakerSnapshot {
        match self.existing(key) {
            Some(entry) => {
                let mut state = entry.lock();
                if let Some(transition) = state.refresh(self.clock.now()) {
                    self.log_transition(key, transition, &state);
                }
                state.snapshot()
            }
            None => BreakerEntry::new(&self.config).snapshot(),
        }
    }

    /// 全キーのスナップショットをキー順で取得
    pub fn snapshots(&self) -> Vec<(ServerModelKey, BreakerSnapshot)> {
        let keys: Vec<ServerModelKey> = self.breakers.iter().map(|e| e.key().clone()).collect();
        let mut snapshots: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let snapshot = self.snapshot(&key);
                (key, snapshot)
            })
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }
}
