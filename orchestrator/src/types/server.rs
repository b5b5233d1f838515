//! 推論サーバー型定義
//!
//! Ollama互換 / OpenAI互換バックエンドの登録情報。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::ServerModelKey;

/// サーバーの状態
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// 初期状態（未確認）
    #[default]
    Pending,
    /// 稼働中
    Online,
    /// 停止中
    Offline,
    /// エラー状態
    Error,
}

impl ServerStatus {
    /// ServerStatusを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }

    /// ルーティング対象として健全か
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl FromStr for ServerStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "online" => Self::Online,
            "offline" => Self::Offline,
            "error" => Self::Error,
            _ => Self::Pending,
        })
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// バックエンドのAPI種別
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Ollama互換（/api/chat, /api/generate）
    #[default]
    Ollama,
    /// OpenAI互換（/v1/chat/completions）
    OpenaiCompatible,
}

impl ServerType {
    /// ServerTypeを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenaiCompatible => "openai_compatible",
        }
    }
}

/// 登録済み推論サーバー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// サーバーID（レジストリ内で一意）
    pub id: String,
    /// 表示名
    pub name: String,
    /// ベースURL（例: http://gpu-01:11434）
    pub base_url: String,
    /// API種別
    pub server_type: ServerType,
    /// 現在の状態
    pub status: ServerStatus,
    /// 提供中のモデル一覧
    pub models: Vec<String>,
    /// 登録日時
    pub registered_at: DateTime<Utc>,
}

impl Server {
    /// 新しいサーバーを作成（状態はPending、モデルなし）
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, server_type: ServerType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: base_url.into(),
            server_type,
            status: ServerStatus::Pending,
            models: Vec::new(),
            registered_at: Utc::now(),
        }
    }

    /// 状態を指定して返す
    pub fn with_status(mut self, status: ServerStatus) -> Self {
        self.status = status;
        self
    }

    /// 提供モデルを指定して返す
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// 指定モデルを提供しているか
    pub fn serves(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// ルーティング対象として健全か
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// このサーバー上のモデルに対応するキー
    pub fn key_for(&self, model: &str) -> ServerModelKey {
        ServerModelKey::new(self.id.clone(), model)
    }
}
