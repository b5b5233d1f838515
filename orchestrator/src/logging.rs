//! ロギング初期化ユーティリティ
//!
//! `tracing-subscriber` のfmtレイヤーをグローバルに登録する。
//! フィルタは `LLM_ORCH_LOG_LEVEL`（旧: `RUST_LOG`）から読み込み、未設定時は `info`。

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::get_env_with_fallback_or;

/// デフォルトのログフィルタ
pub const DEFAULT_LOG_FILTER: &str = "info";

/// 環境変数からログフィルタ文字列を解決する
pub fn resolve_filter() -> String {
    get_env_with_fallback_or("LLM_ORCH_LOG_LEVEL", "RUST_LOG", DEFAULT_LOG_FILTER)
}

fn build_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|err| {
        eprintln!("invalid log filter '{directives}': {err}; falling back to '{DEFAULT_LOG_FILTER}'");
        EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

/// ロギングを初期化する
///
/// 既にグローバルサブスクライバーが登録済みの場合はエラーを返す。
pub fn init() -> anyhow::Result<()> {
    let filter = build_filter(&resolve_filter());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .context("failed to install global tracing subscriber")?;
    tracing::debug!("logging initialized");
    Ok(())
}
