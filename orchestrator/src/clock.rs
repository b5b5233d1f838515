//! 時刻ソース
//!
//! ブレーカーのクールダウンやメトリクスのバケット計算は、すべて `Clock` 経由で
//! 現在時刻を取得する。テストでは `ManualClock` で時間を進めたり戻したりできる。

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration as StdDuration;

/// 現在時刻の取得元
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// 現在時刻
    fn now(&self) -> DateTime<Utc>;
}

/// システム時刻
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手動で進める時計（テスト用）
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// 指定時刻から開始する
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// UNIXエポックからの経過ミリ秒で開始する
    pub fn from_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// 時刻を進める
    pub fn advance(&self, duration: StdDuration) {
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// 時刻を戻す（NTP補正などの再現用）
    pub fn rewind(&self, duration: StdDuration) {
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_sub(delta, Ordering::SeqCst);
    }

    /// 時刻を直接設定する
    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::from_millis(0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// 標準Durationをchrono Durationへ変換（範囲外は最大値に丸める）
pub(crate) fn to_chrono(duration: StdDuration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}
