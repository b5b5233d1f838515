//! サーバー×モデルの複合キー
//!
//! サーキットブレーカー、アドミッションキュー、メトリクスはすべてこのキー単位で管理する。

use serde::{Deserialize, Serialize};
use std::fmt;

/// サーバー×モデルの複合キー
///
/// 同一サーバーでもモデルが異なれば別ターゲットとして扱う。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerModelKey {
    /// サーバーID
    pub server_id: String,
    /// モデル名
    pub model: String,
}

impl ServerModelKey {
    /// 新しいキーを作成
    pub fn new(server_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ServerModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_id, self.model)
    }
}
