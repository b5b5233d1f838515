//! リクエストリース管理
//!
//! ルーティングで確保したキュー枠（とHalfOpen時のプローブ枠）のライフサイクルを
//! 管理する `RequestLease` を提供する。

use std::time::{Duration as StdDuration, Instant};

use super::Router;
use crate::breaker::BreakerPermit;
use crate::metrics::RequestOutcome;
use crate::types::ServerModelKey;

/// リクエスト処理中のlease
///
/// `complete*` が呼ばれずに破棄された場合は、Drop時にタイムアウトとして完了し、
/// キュー枠とカウンタの残留を防ぐ。
#[derive(Debug)]
pub struct RequestLease {
    router: Option<Router>,
    key: ServerModelKey,
    permit: BreakerPermit,
    dispatched: bool,
    started_at: Instant,
}

impl RequestLease {
    pub(crate) fn new(router: Router, key: ServerModelKey, permit: BreakerPermit) -> Self {
        Self {
            router: Some(router),
            key,
            permit,
            dispatched: false,
            started_at: Instant::now(),
        }
    }

    /// 紐づくキーを返す。
    pub fn key(&self) -> &ServerModelKey {
        &self.key
    }

    /// HalfOpenのプローブとして送出されるか
    pub fn is_probe(&self) -> bool {
        self.permit == BreakerPermit::Probe
    }

    /// バックエンドへ送出済みか
    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    /// lease開始からの経過時間を返す。
    pub fn elapsed(&self) -> StdDuration {
        self.started_at.elapsed()
    }

    /// バックエンドへの送出を記録する（queued → inFlight、1回のみ）
    pub fn dispatch(&mut self) {
        if self.dispatched {
            return;
        }
        if let Some(router) = self.router.as_ref() {
            router.metrics.on_dequeue(&self.key);
            router.metrics.on_admit(&self.key);
            self.dispatched = true;
        }
    }

    fn finish(&mut self, outcome: RequestOutcome) {
        self.dispatch();
        let Some(router) = self.router.take() else {
            return;
        };
        router.breakers.record_permit_outcome(
            &self.key,
            self.permit,
            outcome.is_success(),
            StdDuration::from_millis(outcome.latency_ms),
        );
        router.metrics.on_complete(&self.key, outcome);
        router.queue.release(&self.key);
    }

    /// リクエストを指定結果で明示的に完了する。
    pub fn complete(mut self, outcome: RequestOutcome) {
        self.finish(outcome);
    }

    /// 経過時間をレイテンシとして成功で完了する。
    pub fn complete_success(self, tokens: u64) {
        let latency_ms = elapsed_ms(self.started_at);
        self.complete(RequestOutcome::success(latency_ms, tokens));
    }

    /// 経過時間をレイテンシとして失敗で完了する。
    pub fn complete_failure(self) {
        let latency_ms = elapsed_ms(self.started_at);
        self.complete(RequestOutcome::failure(latency_ms));
    }

    /// 自動完了を解除してキーだけを取り出す
    ///
    /// 送出済みとして扱うため、呼び出し側は `report_outcome` と `release` を
    /// それぞれ1回ずつ呼ぶ必要がある。HalfOpen中の結果判定に許可種別が必要な場合は
    /// `into_parts` を使う。
    pub fn into_key(self) -> ServerModelKey {
        self.into_parts().0
    }

    /// 自動完了を解除してキーとブレーカー許可を取り出す
    ///
    /// 呼び出し側は `report_permit_outcome` と `release` をそれぞれ1回ずつ呼ぶ。
    pub fn into_parts(mut self) -> (ServerModelKey, BreakerPermit) {
        self.dispatch();
        self.router = None;
        (self.key.clone(), self.permit)
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl Drop for RequestLease {
    fn drop(&mut self) {
        if self.router.is_none() {
            return;
        }
        tracing::warn!(
            key = %self.key,
            dispatched = self.dispatched,
            "Request lease dropped without completion; recording timeout"
        );
        let latency_ms = elapsed_ms(self.started_at);
        self.finish(RequestOutcome::timeout(latency_ms));
    }
}
