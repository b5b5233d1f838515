//! バランサーモジュールの型定義

use std::cmp::Ordering;

use crate::metrics::RouteStats;
use crate::types::ServerModelKey;

/// ランキング対象の候補
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// 対象キー
    pub key: ServerModelKey,
    /// サーバーの登録順
    pub registration_index: usize,
    /// 直近の統計
    pub stats: RouteStats,
}

/// 候補が除外された理由の内訳
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    /// ブレーカーで除外
    pub breaker_open: usize,
    /// キュー満杯で除外
    pub queue_full: usize,
    /// キュー一時停止で除外
    pub queue_paused: usize,
}

/// 候補の優先順位
///
/// 成功率（降順）→ p95（昇順）→ inFlight + queued（昇順）→ 登録順。
pub fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.stats
        .success_rate
        .total_cmp(&a.stats.success_rate)
        .then_with(|| a.stats.p95_ms.total_cmp(&b.stats.p95_ms))
        .then_with(|| a.stats.load.cmp(&b.stats.load))
        .then_with(|| a.registration_index.cmp(&b.registration_index))
}

/// 候補を優先順に並べ替える
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(compare_candidates);
}
