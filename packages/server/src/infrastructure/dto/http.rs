//! HTTP API DTOs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `GET /api/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    pub id: String,
    pub name: String,
    pub is_authenticated: bool,
    pub user_id: Option<Uuid>,
    pub public_user_id: Option<Uuid>,
    pub connected_at: String,
}

/// `GET /api/meetings/{id}/participants`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsResponse {
    pub meeting_id: String,
    pub participants: Vec<ParticipantDto>,
    pub count: usize,
}

/// `GET /api/meetings/{id}/participants/count`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantCountResponse {
    pub meeting_id: String,
    pub count: usize,
}

/// `GET /api/meetings/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingStatusResponse {
    pub meeting_id: String,
    pub active: bool,
    pub participant_count: usize,
}

/// Body of `POST /api/meetings/{id}/send` and `POST /api/clients/{id}/send`.
///
/// チャットサービスなどが書き込み確定後に呼び出します。
/// `POST /api/clients/{id}/send` では `meetingId` が必須です。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDto {
    pub id: String,
    pub meeting_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_user_id: Option<Uuid>,
    pub name: String,
    pub is_auth: bool,
    pub state: String,
    pub joined_at: String,
    pub last_seen: String,
}

/// `GET /api/webrtc/meetings/{id}/peers`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeersResponse {
    pub meeting_id: String,
    pub peers: Vec<PeerDto>,
    pub count: usize,
}

/// `PUT /api/webrtc/meetings/{id}/peer-state`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePeerStateRequest {
    pub peer_id: String,
    pub state: String,
}

/// `GET /api/webrtc/meetings/{id}/stats`
///
/// ルームが無い場合は `{"exists": false}` のみ。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatsResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_count: Option<BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomTotals {
    pub total: usize,
    pub active: usize,
    pub empty: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerTotals {
    pub total: usize,
    pub average_per_room: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageInfo {
    pub backend: String,
}

/// `GET /api/webrtc/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatsResponse {
    pub rooms: RoomTotals,
    pub peers: PeerTotals,
    pub connection_states: BTreeMap<String, usize>,
    pub storage: StorageInfo,
}
