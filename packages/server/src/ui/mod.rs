//! UI layer
//!
//! axum のルーター、WebSocket のアップグレード、接続セッション（読み書きのポンプ）、
//! HTTP API を提供します。

mod handler;
mod server;
mod session;
mod signal;
pub mod state;

pub use server::Server;
pub use session::SessionTimeouts;
