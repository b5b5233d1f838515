//! サーバーレジストリ
//!
//! サーバーの登録情報をメモリ内で管理する。登録順を保持し、ルーターは
//! スナップショット（クローン）を読むだけで、変更は管理側の責務とする。

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

use crate::common::error::{OrchestratorError, OrchestratorResult};
use crate::types::{Server, ServerStatus};

/// サーバーレジストリ
///
/// 読み取りはルーティングと並行して行われる。結果整合で十分なため、
/// 各操作はロックを短時間だけ保持してクローンを返す。
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    /// 登録順のサーバー一覧
    servers: Arc<RwLock<Vec<Server>>>,
}

impl ServerRegistry {
    /// 空のレジストリを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// サーバーを登録する（ID重複はConflict）
    pub fn add(&self, server: Server) -> OrchestratorResult<()> {
        let mut servers = self.servers.write();
        if servers.iter().any(|s| s.id == server.id) {
            return Err(OrchestratorError::Conflict(format!(
                "server '{}' is already registered",
                server.id
            )));
        }
        info!(
            server_id = %server.id,
            base_url = %server.base_url,
            server_type = server.server_type.as_str(),
            models = server.models.len(),
            "Registered server"
        );
        servers.push(server);
        Ok(())
    }

    /// サーバーを削除する
    pub fn remove(&self, id: &str) -> OrchestratorResult<Server> {
        let mut servers = self.servers.write();
        let index = servers
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| OrchestratorError::ServerNotFound(id.to_string()))?;
        let removed = servers.remove(index);
        info!(server_id = %id, "Removed server");
        Ok(removed)
    }

    /// サーバーを取得
    pub fn get(&self, id: &str) -> Option<Server> {
        self.servers.read().iter().find(|s| s.id == id).cloned()
    }

    /// 全サーバーを登録順で取得
    pub fn list(&self) -> Vec<Server> {
        self.servers.read().clone()
    }

    /// 登録数
    pub fn count(&self) -> usize {
        self.servers.read().len()
    }

    /// 状態を更新する
    pub fn update_status(&self, id: &str, status: ServerStatus) -> OrchestratorResult<()> {
        let mut servers = self.servers.write();
        let server = servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| OrchestratorError::ServerNotFound(id.to_string()))?;
        if server.status != status {
            debug!(
                server_id = %id,
                from = server.status.as_str(),
                to = status.as_str(),
                "Server status changed"
            );
            server.status = status;
        }
        Ok(())
    }

    /// 提供モデル一覧を置き換える
    pub fn set_models<I, S>(&self, id: &str, models: I) -> OrchestratorResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut servers = self.servers.write();
        let server = servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| OrchestratorError::ServerNotFound(id.to_string()))?;
        server.models = models.into_iter().map(Into::into).collect();
        Ok(())
    }

    /// 指定モデルを提供するサーバーを登録順で取得（状態は問わない）
    pub fn find_by_model(&self, model: &str) -> Vec<Server> {
        self.servers
            .read()
            .iter()
            .filter(|s| s.serves(model))
            .cloned()
            .collect()
    }

    /// 指定モデルを提供する健全なサーバーを登録順で取得
    pub fn find_healthy_by_model(&self, model: &str) -> Vec<Server> {
        self.servers
            .read()
            .iter()
            .filter(|s| s.is_healthy() && s.serves(model))
            .cloned()
            .collect()
    }

    /// 登録順インデックス（決定的なタイブレークに使用）
    pub fn registration_index(&self, id: &str) -> Option<usize> {
        self.servers.read().iter().position(|s| s.id == id)
    }

    /// 健全なサーバー数
    pub fn healthy_count(&self) -> usize {
        self.servers.read().iter().filter(|s| s.is_healthy()).count()
    }
}
