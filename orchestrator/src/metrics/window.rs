//! 固定長の時間窓（リングバッファ）
//!
//! バケット位置は `epoch mod M`（epoch = floor(now_ms / bucket_ms)）で決まる。
//! 書き込み時に格納済みepochが異なれば、そのバケットをリセットしてから加算する。
//! 読み取り時は `now_epoch - M < epoch <= now_epoch` のバケットだけを使うため、
//! 期限切れのデータや時計が巻き戻る前に書かれたデータは集計に含まれない。

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use super::percentile::LatencyHistogram;
use super::types::{RequestOutcome, WindowBucketSnapshot};

#[derive(Debug, Clone, Default)]
struct Bucket {
    epoch: Option<i64>,
    requests: u64,
    successes: u64,
    failures: u64,
    latency_sum_ms: u64,
    tokens: u64,
    histogram: Option<LatencyHistogram>,
}

impl Bucket {
    fn reset(&mut self, epoch: i64, track_latency: bool) {
        *self = Bucket {
            epoch: Some(epoch),
            histogram: track_latency.then(LatencyHistogram::default),
            ..Bucket::default()
        };
    }
}

/// ウィンドウ全体の集計
#[derive(Debug, Clone, Default)]
pub(crate) struct WindowSummary {
    pub(crate) requests: u64,
    pub(crate) successes: u64,
    pub(crate) failures: u64,
    pub(crate) latency_sum_ms: u64,
    pub(crate) tokens: u64,
    pub(crate) histogram: LatencyHistogram,
}

impl WindowSummary {
    pub(crate) fn merge(&mut self, other: &WindowSummary) {
        self.requests += other.requests;
        self.successes += other.successes;
        self.failures += other.failures;
        self.latency_sum_ms = self.latency_sum_ms.saturating_add(other.latency_sum_ms);
        self.tokens = self.tokens.saturating_add(other.tokens);
        self.histogram.merge(&other.histogram);
    }

    /// 成功率（0件なら0）
    pub(crate) fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }

    /// 成功1件あたりのトークン数（成功0件なら0）
    pub(crate) fn avg_tokens_per_request(&self) -> f64 {
        if self.successes == 0 {
            0.0
        } else {
            self.tokens as f64 / self.successes as f64
        }
    }

    pub(crate) fn average_latency_ms(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.latency_sum_ms as f64 / self.requests as f64)
    }
}

/// 固定バケット数のスライディングウィンドウ
#[derive(Debug, Clone)]
pub(crate) struct SlidingWindow {
    bucket_ms: i64,
    track_latency: bool,
    buckets: Box<[Bucket]>,
}

impl SlidingWindow {
    /// `track_latency` がtrueの場合のみバケットごとにヒストグラムを持つ
    pub(crate) fn new(bucket: Duration, count: usize, track_latency: bool) -> Self {
        let bucket_ms = i64::try_from(bucket.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            bucket_ms,
            track_latency,
            buckets: vec![Bucket::default(); count.max(1)].into_boxed_slice(),
        }
    }

    fn len(&self) -> i64 {
        self.buckets.len() as i64
    }

    fn epoch_of(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis().div_euclid(self.bucket_ms)
    }

    fn slot(&self, epoch: i64) -> usize {
        epoch.rem_euclid(self.len()) as usize
    }

    fn is_live(&self, epoch: i64, now_epoch: i64) -> bool {
        epoch <= now_epoch && epoch > now_epoch.saturating_sub(self.len())
    }

    fn epoch_start(&self, epoch: i64) -> DateTime<Utc> {
        let millis = epoch.saturating_mul(self.bucket_ms);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// 完了結果を現在のバケットへ加算
    pub(crate) fn record(&mut self, now: DateTime<Utc>, outcome: &RequestOutcome) {
        let epoch = self.epoch_of(now);
        let slot = self.slot(epoch);
        let track_latency = self.track_latency;
        let bucket = &mut self.buckets[slot];
        if bucket.epoch != Some(epoch) {
            bucket.reset(epoch, track_latency);
        }
        bucket.requests += 1;
        if outcome.is_success() {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }
        bucket.latency_sum_ms = bucket.latency_sum_ms.saturating_add(outcome.latency_ms);
        bucket.tokens = bucket.tokens.saturating_add(outcome.tokens);
        if let Some(histogram) = bucket.histogram.as_mut() {
            histogram.record(outcome.latency_ms);
        }
    }

    /// 有効なバケットを合算
    pub(crate) fn summary(&self, now: DateTime<Utc>) -> WindowSummary {
        let now_epoch = self.epoch_of(now);
        let mut summary = WindowSummary::default();
        for bucket in self.buckets.iter() {
            let Some(epoch) = bucket.epoch else { continue };
            if !self.is_live(epoch, now_epoch) {
                continue;
            }
            summary.requests += bucket.requests;
            summary.successes += bucket.successes;
            summary.failures += bucket.failures;
            summary.latency_sum_ms = summary.latency_sum_ms.saturating_add(bucket.latency_sum_ms);
            summary.tokens = summary.tokens.saturating_add(bucket.tokens);
            if let Some(histogram) = bucket.histogram.as_ref() {
                summary.histogram.merge(histogram);
            }
        }
        summary
    }

    /// 全バケットを古い順に返す（データのないバケットは0件）
    pub(crate) fn buckets(&self, now: DateTime<Utc>) -> Vec<WindowBucketSnapshot> {
        let now_epoch = self.epoch_of(now);
        let first = now_epoch.saturating_sub(self.len() - 1);
        (first..=now_epoch)
            .map(|epoch| {
                let bucket = &self.buckets[self.slot(epoch)];
                let start = self.epoch_start(epoch);
                if bucket.epoch != Some(epoch) {
                    return WindowBucketSnapshot {
                        start,
                        ..WindowBucketSnapshot::default()
                    };
                }
                WindowBucketSnapshot {
                    start,
                    requests: bucket.requests,
                    successes: bucket.successes,
                    failures: bucket.failures,
                    total_latency_ms: bucket.latency_sum_ms,
                    total_tokens: bucket.tokens,
                }
            })
            .collect()
    }
}
