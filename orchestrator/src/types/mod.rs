//! 型定義

/// サーバー×モデルキー
pub mod key;
/// サーバー情報
pub mod server;

pub use key::ServerModelKey;
pub use server::{Server, ServerStatus, ServerType};
