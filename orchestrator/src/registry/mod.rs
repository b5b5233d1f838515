//! サーバー登録管理
//!
//! サーバーの状態と提供モデルをメモリ内で管理する。

pub mod servers;

pub use servers::ServerRegistry;
