//! サーキットブレーカーの型定義
//!
//! 状態遷移そのもの（`BreakerEntry`）はキー単位のロック内でのみ操作される。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration as StdDuration;

use crate::clock::to_chrono;
use crate::config::BreakerConfig;

/// ブレーカー状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// 通常稼働（初期状態）
    #[default]
    Closed,
    /// 遮断中
    Open,
    /// 回復確認中（限られた数のプローブのみ許可）
    HalfOpen,
}

impl CircuitState {
    /// CircuitStateを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// ブレーカー通過時に得られる許可
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPermit {
    /// Closed状態での通常通過
    Normal,
    /// HalfOpen状態のプローブ枠を1つ確保した
    Probe,
}

/// 状態遷移の記録（ログ用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub(crate) from: CircuitState,
    pub(crate) to: CircuitState,
}

/// ブレーカーの公開スナップショット
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerSnapshot {
    /// 現在の状態
    pub state: CircuitState,
    /// 連続失敗回数
    pub consecutive_failures: u32,
    /// 直近でOpenになった時刻
    pub opened_at: Option<DateTime<Utc>>,
    /// 現在のクールダウン（ミリ秒）
    pub current_cooldown_ms: u64,
    /// HalfOpen中のプローブ実行数
    pub half_open_probes_in_flight: u32,
    /// これまでにOpenへ遷移した回数
    pub open_count: u64,
}

/// キー単位のブレーカー状態
#[derive(Debug, Clone)]
pub(crate) struct BreakerEntry {
    pub(crate) state: CircuitState,
    pub(crate) consecutive_failures: u32,
    pub(crate) opened_at: Option<DateTime<Utc>>,
    pub(crate) current_cooldown: StdDuration,
    pub(crate) half_open_probes_in_flight: u32,
    pub(crate) open_count: u64,
}

impl BreakerEntry {
    pub(crate) fn new(config: &BreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            current_cooldown: config.cooldown,
            half_open_probes_in_flight: 0,
            open_count: 0,
        }
    }

    /// クールダウン経過済みのOpenをHalfOpenへ遷移させる（読み取り時の遅延遷移）
    pub(crate) fn refresh(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if self.state != CircuitState::Open {
            return None;
        }
        let opened_at = self.opened_at?;
        // 時計が巻き戻った場合は経過時間が負になり、Openのまま維持される
        if now - opened_at >= to_chrono(self.current_cooldown) {
            self.state = CircuitState::HalfOpen;
            self.half_open_probes_in_flight = 0;
            return Some(Transition {
                from: CircuitState::Open,
                to: CircuitState::HalfOpen,
            });
        }
        None
    }

    pub(crate) fn is_eligible(&self, config: &BreakerConfig) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                self.half_open_probes_in_flight < config.half_open_max_probes
            }
            CircuitState::Open => false,
        }
    }

    pub(crate) fn try_acquire(&mut self, config: &BreakerConfig) -> Option<BreakerPermit> {
        match self.state {
            CircuitState::Closed => Some(BreakerPermit::Normal),
            CircuitState::HalfOpen
                if self.half_open_probes_in_flight < config.half_open_max_probes =>
            {
                self.half_open_probes_in_flight += 1;
                Some(BreakerPermit::Probe)
            }
            _ => None,
        }
    }

    pub(crate) fn release_probe(&mut self) {
        self.half_open_probes_in_flight = self.half_open_probes_in_flight.saturating_sub(1);
    }

    /// 結果を反映する。HalfOpen中の結果はプローブ結果として扱う。
    pub(crate) fn record(
        &mut self,
        success: bool,
        now: DateTime<Utc>,
        config: &BreakerConfig,
    ) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                if success {
                    self.consecutive_failures = 0;
                    return None;
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= config.failure_threshold {
                    self.current_cooldown = config.cooldown;
                    self.open(now);
                    return Some(Transition {
                        from: CircuitState::Closed,
                        to: CircuitState::Open,
                    });
                }
                None
            }
            CircuitState::HalfOpen => {
                self.release_probe();
                if success {
                    self.close();
                    Some(Transition {
                        from: CircuitState::HalfOpen,
                        to: CircuitState::Closed,
                    })
                } else {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    self.current_cooldown = next_cooldown(self.current_cooldown, config);
                    self.open(now);
                    Some(Transition {
                        from: CircuitState::HalfOpen,
                        to: CircuitState::Open,
                    })
                }
            }
            // Open中に届いた結果は遮断前に送出されたリクエストのものなので遷移に使わない
            CircuitState::Open => None,
        }
    }

    pub(crate) fn force_open(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let from = self.state;
        self.open(now);
        (from != CircuitState::Open).then_some(Transition {
            from,
            to: CircuitState::Open,
        })
    }

    pub(crate) fn force_close(&mut self, config: &BreakerConfig) -> Option<Transition> {
        let from = self.state;
        self.close();
        self.current_cooldown = config.cooldown;
        (from != CircuitState::Closed).then_some(Transition {
            from,
            to: CircuitState::Closed,
        })
    }

    pub(crate) fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at,
            current_cooldown_ms: u64::try_from(self.current_cooldown.as_millis())
                .unwrap_or(u64::MAX),
            half_open_probes_in_flight: self.half_open_probes_in_flight,
            open_count: self.open_count,
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_probes_in_flight = 0;
        self.open_count = self.open_count.saturating_add(1);
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.half_open_probes_in_flight = 0;
    }
}

/// 再Open時のクールダウン（指数バックオフ、上限あり）
pub(crate) fn next_cooldown(current: StdDuration, config: &BreakerConfig) -> StdDuration {
    let scaled = current.as_secs_f64() * config.backoff_multiplier;
    let capped = scaled.min(config.max_cooldown.as_secs_f64());
    StdDuration::try_from_secs_f64(capped).unwrap_or(config.max_cooldown)
}
