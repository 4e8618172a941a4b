//! Signaling hub
//!
//! - `connection`: 登録済みの接続（送信キューの送信側を保持）
//! - `registry`: Connection Registry
//! - `directory`: Room Directory
//! - `router`: 両者を所有するイベントループ（アクター）とそのハンドル

pub mod connection;
pub mod directory;
pub mod registry;
pub mod router;

pub use router::{Hub, HubHandle};
