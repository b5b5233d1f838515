//! アドミッションキュー
//!
//! サーバー×モデル単位の上限付きカウンタ。待ち行列ではなく、満杯・一時停止時は
//! 即座に拒否を返す（呼び出し側を待たせない）。

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::common::error::{CommonError, OrchestratorError, OrchestratorResult};
use crate::config::QueueConfig;
use crate::types::ServerModelKey;

/// アドミッション制御の判断結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// 受け入れ（枠を1つ確保済み）
    Admitted,
    /// 上限に達している
    QueueFull,
    /// 管理操作で一時停止中
    QueuePaused,
}

impl AdmissionDecision {
    /// 受け入れられたか
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    /// 拒否理由をエラーに変換（受け入れ時はOk）
    pub fn into_result(self, key: &ServerModelKey) -> OrchestratorResult<()> {
        match self {
            Self::Admitted => Ok(()),
            Self::QueueFull => Err(OrchestratorError::QueueFull(key.clone())),
            Self::QueuePaused => Err(OrchestratorError::QueuePaused(key.clone())),
        }
    }
}

/// キュー状態のスナップショット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    /// 上限
    pub capacity: usize,
    /// 現在の確保数
    pub depth: usize,
    /// 一時停止中か
    pub paused: bool,
}

#[derive(Debug, Clone, Copy)]
struct QueueState {
    capacity: usize,
    depth: usize,
    paused: bool,
}

impl QueueState {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            capacity: self.capacity,
            depth: self.depth,
            paused: self.paused,
        }
    }
}

/// アドミッションキュー
#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    default_capacity: usize,
    queues: Arc<DashMap<ServerModelKey, Arc<Mutex<QueueState>>>>,
    anomalies: Arc<AtomicU64>,
}

impl AdmissionQueue {
    /// 新しいキューを作成
    pub fn new(config: QueueConfig) -> Self {
        Self {
            default_capacity: config.capacity,
            queues: Arc::new(DashMap::new()),
            anomalies: Arc::new(AtomicU64::new(0)),
        }
    }

    fn existing(&self, key: &ServerModelKey) -> Option<Arc<Mutex<QueueState>>> {
        self.queues.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn entry(&self, key: &ServerModelKey) -> Arc<Mutex<QueueState>> {
        if let Some(queue) = self.existing(key) {
            return queue;
        }
        let queue = self.queues.entry(key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(QueueState {
                capacity: self.default_capacity,
                depth: 0,
                paused: false,
            }))
        });
        Arc::clone(queue.value())
    }

    /// 枠の確保を試みる（ブロックしない）
    pub fn try_admit(&self, key: &ServerModelKey) -> AdmissionDecision {
        let queue = self.entry(key);
        let mut state = queue.lock();
        if state.paused {
            debug!(key = %key, "Admission rejected: queue paused");
            return AdmissionDecision::QueuePaused;
        }
        if state.depth >= state.capacity {
            debug!(
                key = %key,
                depth = state.depth,
                capacity = state.capacity,
                "Admission rejected: queue full"
            );
            return AdmissionDecision::QueueFull;
        }
        state.depth += 1;
        AdmissionDecision::Admitted
    }

    /// 確保した枠を返却する
    ///
    /// 対応する確保がない場合は0のまま異常として記録し、falseを返す。
    pub fn release(&self, key: &ServerModelKey) -> bool {
        let released = self
            .existing(key)
            .map(|queue| {
                let mut state = queue.lock();
                match state.depth.checked_sub(1) {
                    Some(depth) => {
                        state.depth = depth;
                        true
                    }
                    None => false,
                }
            })
            .unwrap_or(false);
        if !released {
            self.anomalies.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, "Queue release without matching admission, ignoring");
        }
        released
    }

    /// 新規受け入れを停止する（受け入れ済みの処理には影響しない）
    pub fn pause(&self, key: &ServerModelKey) {
        self.entry(key).lock().paused = true;
        info!(key = %key, "Admission queue paused");
    }

    /// 受け入れを再開する
    pub fn resume(&self, key: &ServerModelKey) {
        self.entry(key).lock().paused = false;
        info!(key = %key, "Admission queue resumed");
    }

    /// 確保数を0に戻す（処理中のリクエストは取り消さない）
    ///
    /// 以降に届く既存リクエストの返却は異常として記録される。戻り値はクリア前の確保数。
    pub fn clear(&self, key: &ServerModelKey) -> usize {
        let Some(queue) = self.existing(key) else {
            return 0;
        };
        let previous = std::mem::take(&mut queue.lock().depth);
        warn!(key = %key, cleared = previous, "Admission queue cleared");
        previous
    }

    /// 上限を変更する（確保数0のときのみ）
    pub fn configure(&self, key: &ServerModelKey, capacity: usize) -> OrchestratorResult<()> {
        if capacity == 0 {
            return Err(
                CommonError::Validation("queue capacity must be at least 1".to_string()).into(),
            );
        }
        let queue = self.entry(key);
        let mut state = queue.lock();
        if state.depth > 0 {
            return Err(OrchestratorError::Conflict(format!(
                "queue for {key} is busy (depth {})",
                state.depth
            )));
        }
        state.capacity = capacity;
        info!(key = %key, capacity, "Admission queue configured");
        Ok(())
    }

    /// 現在の確保数
    pub fn depth(&self, key: &ServerModelKey) -> usize {
        self.existing(key).map(|q| q.lock().depth).unwrap_or(0)
    }

    /// 一時停止中か
    pub fn is_paused(&self, key: &ServerModelKey) -> bool {
        self.existing(key).map(|q| q.lock().paused).unwrap_or(false)
    }

    /// スナップショット（未使用キーは既定値）
    pub fn snapshot(&self, key: &ServerModelKey) -> QueueSnapshot {
        self.existing(key)
            .map(|q| q.lock().snapshot())
            .unwrap_or(QueueSnapshot {
                capacity: self.default_capacity,
                depth: 0,
                paused: false,
            })
    }

    /// 全キーのスナップショットをキー順で取得
    pub fn snapshots(&self) -> Vec<(ServerModelKey, QueueSnapshot)> {
        let mut snapshots: Vec<_> = self
            .queues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// 検出した異常の総数
    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }
}
