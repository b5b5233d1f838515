//! レイテンシ分布の推定
//!
//! 対数スケールの固定ビンヒストグラム。メモリ量はリクエスト数によらず一定で、
//! 推定値は観測された最小値・最大値の範囲に丸められる。

use serde::Serialize;

/// ビン数
pub(crate) const BIN_COUNT: usize = 64;
/// 隣接ビン境界の比率
const GROWTH: f64 = 1.25;

/// p50/p95/p99 の推定値（ミリ秒）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Percentiles {
    /// 中央値
    pub p50: f64,
    /// 95パーセンタイル
    pub p95: f64,
    /// 99パーセンタイル
    pub p99: f64,
}

/// 固定サイズのレイテンシヒストグラム
///
/// ビン `i` の上限は `GROWTH^i` ミリ秒（ビン0は1ms以下）。最終ビンは上限なし。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyHistogram {
    bins: [u64; BIN_COUNT],
    count: u64,
    min_ms: u64,
    max_ms: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            bins: [0; BIN_COUNT],
            count: 0,
            min_ms: u64::MAX,
            max_ms: 0,
        }
    }
}

fn bin_for(latency_ms: u64) -> usize {
    if latency_ms <= 1 {
        return 0;
    }
    let index = ((latency_ms as f64).ln() / GROWTH.ln()).ceil();
    (index as usize).min(BIN_COUNT - 1)
}

fn upper_bound(bin: usize) -> f64 {
    GROWTH.powi(bin as i32)
}

impl LatencyHistogram {
    /// 観測値を追加
    pub fn record(&mut self, latency_ms: u64) {
        self.bins[bin_for(latency_ms)] += 1;
        self.count += 1;
        self.min_ms = self.min_ms.min(latency_ms);
        self.max_ms = self.max_ms.max(latency_ms);
    }

    /// 別のヒストグラムを合算
    pub fn merge(&mut self, other: &LatencyHistogram) {
        if other.count == 0 {
            return;
        }
        for (mine, theirs) in self.bins.iter_mut().zip(other.bins.iter()) {
            *mine += theirs;
        }
        self.count += other.count;
        self.min_ms = self.min_ms.min(other.min_ms);
        self.max_ms = self.max_ms.max(other.max_ms);
    }

    /// 観測数
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 分位点を推定（観測なしは0）
    pub fn quantile(&self, q: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let q = q.clamp(0.0, 1.0);
        let rank = ((q * self.count as f64).ceil() as u64).clamp(1, self.count);
        if rank == 1 {
            return self.min_ms as f64;
        }
        if rank == self.count {
            return self.max_ms as f64;
        }
        let mut cumulative = 0u64;
        for (bin, &n) in self.bins.iter().enumerate() {
            cumulative += n;
            if cumulative >= rank {
                if bin == BIN_COUNT - 1 {
                    break;
                }
                return upper_bound(bin).clamp(self.min_ms as f64, self.max_ms as f64);
            }
        }
        self.max_ms as f64
    }

    /// p50/p95/p99 をまとめて取得
    pub fn percentiles(&self) -> Percentiles {
        Percentiles {
            p50: self.quantile(0.50),
            p95: self.quantile(0.95),
            p99: self.quantile(0.99),
        }
    }
}
