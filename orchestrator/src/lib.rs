//! LLM orchestrator routing engine
//!
//! 複数のLLM推論サーバー（Ollama / OpenAI互換）の前段で、
//! サーバー×モデル単位のサーキットブレーカー・アドミッションキュー・
//! メトリクス集計を使って送信先を選ぶルーティングエンジン。

#![warn(missing_docs)]

/// 共通型定義（エラー）
pub mod common;

/// 共有型（サーバー×モデルキー、サーバー情報）
pub mod types;

/// 時刻ソース
pub mod clock;

/// 設定管理（環境変数ヘルパー）
pub mod config;

/// ロギング初期化ユーティリティ
pub mod logging;

/// サーバー登録管理
pub mod registry;

/// サーキットブレーカー
pub mod breaker;

/// メトリクス集計（時間窓・分位点）
pub mod metrics;

/// アドミッションキュー（バックプレッシャー）
pub mod queue;

/// ロードバランサー（候補のランキングと選択）
pub mod balancer;

/// オーケストレーターコンテキスト
pub mod orchestrator;

pub use balancer::RequestLease;
pub use common::error::{OrchestratorError, OrchestratorResult};
pub use metrics::{OutcomeKind, RequestOutcome};
pub use orchestrator::Orchestrator;
pub use types::ServerModelKey;
