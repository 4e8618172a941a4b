//! Infrastructure layer
//!
//! - `dto`: ワイヤー形式・HTTP の DTO と変換
//! - `hub`: シグナリングハブ（アクター）
//! - `peer_store`: Peer-State の保存先
//! - `repository`: 外部コラボレーターの実装

pub mod dto;
pub mod hub;
pub mod peer_store;
pub mod repository;
