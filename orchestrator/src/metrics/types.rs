//! メトリクスモジュールの型定義

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::percentile::Percentiles;
use crate::types::ServerModelKey;

/// リクエスト結果の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// 正常終了
    Success,
    /// エラー終了
    Failure,
    /// タイムアウト・キャンセル
    Timeout,
}

impl OutcomeKind {
    /// 成功扱いか
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// OutcomeKindを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

/// 完了したリクエストの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    /// 結果種別
    pub kind: OutcomeKind,
    /// 処理時間（ミリ秒）
    pub latency_ms: u64,
    /// 出力トークン数（失敗時はバックエンドが部分使用量を返した場合のみ）
    pub tokens: u64,
}

impl RequestOutcome {
    /// 成功
    pub fn success(latency_ms: u64, tokens: u64) -> Self {
        Self {
            kind: OutcomeKind::Success,
            latency_ms,
            tokens,
        }
    }

    /// 失敗
    pub fn failure(latency_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            latency_ms,
            tokens: 0,
        }
    }

    /// タイムアウト
    pub fn timeout(latency_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::Timeout,
            latency_ms,
            tokens: 0,
        }
    }

    /// 部分的なトークン使用量を付与
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    /// 成功扱いか
    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }
}

/// サーバー×モデル単位のTPS EMA状態
#[derive(Debug, Clone, Default)]
pub struct ModelTpsState {
    /// EMA平滑化されたTPS値（None=未計測）
    pub tps_ema: Option<f64>,
    /// 計測に使ったリクエスト数
    pub request_count: u64,
    /// 出力トークン累計
    pub total_output_tokens: u64,
    /// 処理時間累計（ミリ秒）
    pub total_duration_ms: u64,
}

impl ModelTpsState {
    /// TPS計測値を更新（EMA α=0.2）
    ///
    /// TPS = output_tokens / (duration_ms / 1000)
    /// EMA: new_ema = α × current_tps + (1 - α) × previous_ema
    pub fn update_tps(&mut self, output_tokens: u64, duration_ms: u64) {
        if duration_ms == 0 || output_tokens == 0 {
            return;
        }

        let current_tps = output_tokens as f64 / (duration_ms as f64 / 1000.0);

        const ALPHA: f64 = 0.2;
        self.tps_ema = Some(match self.tps_ema {
            Some(prev) => ALPHA * current_tps + (1.0 - ALPHA) * prev,
            None => current_tps,
        });

        self.request_count = self.request_count.saturating_add(1);
        self.total_output_tokens = self.total_output_tokens.saturating_add(output_tokens);
        self.total_duration_ms = self.total_duration_ms.saturating_add(duration_ms);
    }
}

/// 初回観測からの累計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifetimeTotals {
    /// 完了リクエスト数
    pub requests: u64,
    /// 成功数
    pub successes: u64,
    /// 失敗数（タイムアウトを除く）
    pub failures: u64,
    /// タイムアウト数
    pub timeouts: u64,
    /// トークン累計
    pub tokens: u64,
}

impl LifetimeTotals {
    pub(crate) fn record(&mut self, outcome: &RequestOutcome) {
        self.requests += 1;
        match outcome.kind {
            OutcomeKind::Success => self.successes += 1,
            OutcomeKind::Failure => self.failures += 1,
            OutcomeKind::Timeout => self.timeouts += 1,
        }
        self.tokens = self.tokens.saturating_add(outcome.tokens);
    }

    pub(crate) fn add(&mut self, other: &LifetimeTotals) {
        self.requests += other.requests;
        self.successes += other.successes;
        self.failures += other.failures;
        self.timeouts += other.timeouts;
        self.tokens = self.tokens.saturating_add(other.tokens);
    }

    /// 結果種別ごとの件数
    pub fn count_for(&self, kind: OutcomeKind) -> u64 {
        match kind {
            OutcomeKind::Success => self.successes,
            OutcomeKind::Failure => self.failures,
            OutcomeKind::Timeout => self.timeouts,
        }
    }
}

/// 時間バケット1つ分の集計
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowBucketSnapshot {
    /// バケット開始時刻
    pub start: DateTime<Utc>,
    /// 完了リクエスト数
    pub requests: u64,
    /// 成功数
    pub successes: u64,
    /// 失敗数（タイムアウト含む）
    pub failures: u64,
    /// レイテンシ合計（ミリ秒）
    pub total_latency_ms: u64,
    /// トークン合計
    pub total_tokens: u64,
}

/// サーバー×モデル単位の詳細メトリクス
#[derive(Debug, Clone, Serialize)]
pub struct DetailedMetrics {
    /// 対象キー
    pub key: ServerModelKey,
    /// 処理中リクエスト数
    pub in_flight: u64,
    /// 受け入れ済み・未送出のリクエスト数
    pub queued: u64,
    /// 直近ウィンドウのバケット（古い順）
    pub windows: Vec<WindowBucketSnapshot>,
    /// 長期履歴のバケット（古い順）
    pub history: Vec<WindowBucketSnapshot>,
    /// 直近ウィンドウのレイテンシ分位点
    pub percentiles: Percentiles,
    /// 直近ウィンドウの成功率（0件なら0）
    pub success_rate: f64,
    /// 直近ウィンドウのスループット（件/秒）
    pub throughput: f64,
    /// 成功1件あたりの平均トークン数
    pub avg_tokens_per_request: f64,
    /// 直近ウィンドウの平均レイテンシ（ミリ秒）
    pub average_latency_ms: Option<f64>,
    /// TPS（EMA）
    pub tokens_per_second: Option<f64>,
    /// 累計
    pub totals: LifetimeTotals,
    /// 整合しない完了・解放の検出数
    pub anomalies: u64,
    /// 初回観測時刻
    pub first_seen: DateTime<Utc>,
    /// 最終完了時刻
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// 全キー集計メトリクス（要求時に計算）
#[derive(Debug, Clone, Serialize)]
pub struct GlobalMetrics {
    /// 観測済みキー数
    pub keys: usize,
    /// 処理中リクエスト総数
    pub total_in_flight: u64,
    /// 未送出リクエスト総数
    pub total_queued: u64,
    /// 直近ウィンドウの完了数
    pub recent_requests: u64,
    /// 直近ウィンドウの成功数
    pub recent_successes: u64,
    /// 直近ウィンドウの失敗数
    pub recent_failures: u64,
    /// 直近ウィンドウの成功率
    pub success_rate: f64,
    /// 直近ウィンドウのスループット（件/秒）
    pub throughput: f64,
    /// 成功1件あたりの平均トークン数
    pub avg_tokens_per_request: f64,
    /// 直近ウィンドウの平均レイテンシ（ミリ秒）
    pub average_latency_ms: Option<f64>,
    /// 全キーを合算したレイテンシ分位点
    pub percentiles: Percentiles,
    /// 累計
    pub totals: LifetimeTotals,
    /// 整合しない完了・解放の検出数（未知キーを含む）
    pub anomalies: u64,
    /// 計算時刻
    pub generated_at: DateTime<Utc>,
}

/// ルーティングのランキングに使う軽量な統計
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteStats {
    /// 直近ウィンドウの成功率（完了0件なら1.0）
    pub success_rate: f64,
    /// 直近ウィンドウのp95（完了0件なら0）
    pub p95_ms: f64,
    /// inFlight + queued
    pub load: u64,
}

impl Default for RouteStats {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            p95_ms: 0.0,
            load: 0,
        }
    }
}
