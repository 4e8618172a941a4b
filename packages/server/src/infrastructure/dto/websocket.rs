//! WebSocket message DTOs
//!
//! ワイヤー形式は `type` / `meetingId` / `from` / `to` / `data` / `timestamp`
//! を持つ JSON オブジェクトです。未知のフィールドは無視されます。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope received from a client.
///
/// `meetingId` / `from` / `timestamp` はサーバーが付け直すため読み捨てます。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Envelope pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub meeting_id: String,
    /// Empty for server-originated messages.
    pub from: String,
    /// Empty for room-wide messages.
    pub to: String,
    pub data: Value,
    /// RFC 3339 (UTC, millisecond precision)
    pub timestamp: String,
}
