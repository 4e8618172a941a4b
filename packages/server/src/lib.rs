//! Kaigi signaling server library.
//!
//! 会議ごとの接続管理（Connection Registry / Room Directory）、
//! シグナリングメッセージを中継するハブ、接続セッション、
//! WebRTC のピア状態を管理する Peer-State を提供します。

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

// configuration
pub mod config;
