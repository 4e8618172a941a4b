//! Conversion logic between DTOs and domain models.

use std::collections::BTreeMap;

use kaigi_shared::time::timestamp_to_rfc3339;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{
    ClientId, ClientSummary, DomainError, GlobalStats, MeetingId, MessageKind, OutboundFrame,
    PeerRecord, PeerState, RoomStats, SignalPayload, SignalType, SignalingMessage, Timestamp,
    TypingPayload,
};
use crate::infrastructure::dto::{http, websocket as dto};

/// Inbound frame that could not be turned into a [`SignalingMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid target: {0}")]
    InvalidTarget(DomainError),
    #[error("invalid '{kind}' payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// ========================================
// Wire → Domain
// ========================================

/// クライアントから受信したフレームをデコードする
///
/// `meetingId` / `from` / `timestamp` はクライアントの値を使わず、
/// 接続の情報で上書きします。
pub fn decode_inbound(
    text: &str,
    meeting_id: &MeetingId,
    from: &ClientId,
    now: Timestamp,
) -> Result<SignalingMessage, DecodeError> {
    let envelope: dto::InboundEnvelope = serde_json::from_str(text)?;
    let kind = MessageKind::from_tag(&envelope.kind);
    let to = parse_target(envelope.to)?;
    let payload = payload_from_value(&kind, envelope.data)?;
    Ok(SignalingMessage {
        kind,
        meeting_id: meeting_id.clone(),
        from: Some(from.clone()),
        to,
        payload,
        timestamp: now,
    })
}

/// サーバー側（HTTP 経由のコラボレーター）が発行するメッセージを組み立てる
pub fn build_server_message(
    tag: &str,
    meeting_id: MeetingId,
    to: Option<ClientId>,
    data: Value,
    now: Timestamp,
) -> Result<SignalingMessage, DecodeError> {
    let kind = MessageKind::from_tag(tag);
    let payload = payload_from_value(&kind, data)?;
    Ok(SignalingMessage {
        kind,
        meeting_id,
        from: None,
        to,
        payload,
        timestamp: now,
    })
}

fn parse_target(to: Option<String>) -> Result<Option<ClientId>, DecodeError> {
    match to {
        Some(to) if !to.trim().is_empty() => ClientId::new(to)
            .map(Some)
            .map_err(DecodeError::InvalidTarget),
        _ => Ok(None),
    }
}

/// `type` を読んだ後に `data` を対応する形にパースする
pub fn payload_from_value(kind: &MessageKind, data: Value) -> Result<SignalPayload, DecodeError> {
    let Some(signal) = kind.known() else {
        return Ok(SignalPayload::Raw(data));
    };
    let typed = |source| DecodeError::Payload {
        kind: signal.as_str(),
        source,
    };
    let payload = match signal {
        SignalType::Join | SignalType::Leave => SignalPayload::Empty,
        SignalType::Offer | SignalType::Answer => {
            SignalPayload::SessionDescription(serde_json::from_value(data).map_err(typed)?)
        }
        SignalType::IceCandidate => {
            SignalPayload::IceCandidate(serde_json::from_value(data).map_err(typed)?)
        }
        SignalType::ParticipantJoined => {
            SignalPayload::Participant(serde_json::from_value(data).map_err(typed)?)
        }
        SignalType::ParticipantLeft => {
            SignalPayload::ParticipantLeft(serde_json::from_value(data).map_err(typed)?)
        }
        SignalType::ChatMessage
        | SignalType::ChatEdit
        | SignalType::ChatDelete
        | SignalType::ChatReaction
        | SignalType::ChatReadStatus => SignalPayload::Chat(data),
        SignalType::ChatTyping | SignalType::ChatTypingStop => {
            if data.is_null() {
                SignalPayload::Typing(TypingPayload::default())
            } else {
                SignalPayload::Typing(serde_json::from_value(data).map_err(typed)?)
            }
        }
    };
    Ok(payload)
}

// ========================================
// Domain → Wire
// ========================================

pub fn payload_to_value(payload: &SignalPayload) -> Result<Value, serde_json::Error> {
    match payload {
        SignalPayload::Empty => Ok(Value::Null),
        SignalPayload::SessionDescription(sdp) => serde_json::to_value(sdp),
        SignalPayload::IceCandidate(candidate) => serde_json::to_value(candidate),
        SignalPayload::Participant(participant) => serde_json::to_value(participant),
        SignalPayload::ParticipantLeft(left) => serde_json::to_value(left),
        SignalPayload::Typing(typing) => serde_json::to_value(typing),
        SignalPayload::Chat(value) | SignalPayload::Raw(value) => Ok(value.clone()),
    }
}

pub fn to_envelope(message: &SignalingMessage) -> Result<dto::OutboundEnvelope, serde_json::Error> {
    Ok(dto::OutboundEnvelope {
        kind: message.kind.as_str().to_string(),
        meeting_id: message.meeting_id.to_string(),
        from: message
            .from
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        to: message
            .to
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        data: payload_to_value(&message.payload)?,
        timestamp: timestamp_to_rfc3339(message.timestamp.value()),
    })
}

/// 送信キューに積むフレームにエンコードする
pub fn encode_frame(message: &SignalingMessage) -> Result<OutboundFrame, serde_json::Error> {
    let text = serde_json::to_string(&to_envelope(message)?)?;
    Ok(OutboundFrame::from(text))
}

// ========================================
// Domain → HTTP DTO
// ========================================

impl From<ClientSummary> for http::ParticipantDto {
    fn from(model: ClientSummary) -> Self {
        Self {
            id: model.id.into_string(),
            name: model.name,
            is_authenticated: model.is_authenticated,
            user_id: model.user_id,
            public_user_id: model.public_user_id,
            connected_at: timestamp_to_rfc3339(model.connected_at.value()),
        }
    }
}

impl From<PeerRecord> for http::PeerDto {
    fn from(model: PeerRecord) -> Self {
        Self {
            id: model.id.into_string(),
            meeting_id: model.meeting_id.into_string(),
            user_id: model.user_id,
            public_user_id: model.public_user_id,
            name: model.name,
            is_auth: model.is_authenticated,
            state: model.state.as_str().to_string(),
            joined_at: timestamp_to_rfc3339(model.joined_at.value()),
            last_seen: timestamp_to_rfc3339(model.last_seen.value()),
        }
    }
}

fn state_names(counts: BTreeMap<PeerState, usize>) -> BTreeMap<String, usize> {
    counts
        .into_iter()
        .map(|(state, count)| (state.as_str().to_string(), count))
        .collect()
}

impl From<Option<RoomStats>> for http::RoomStatsResponse {
    fn from(stats: Option<RoomStats>) -> Self {
        match stats {
            None => Self {
                exists: false,
                peer_count: None,
                created_at: None,
                last_activity: None,
                state_count: None,
            },
            Some(stats) => Self {
                exists: true,
                peer_count: Some(stats.peer_count),
                created_at: Some(timestamp_to_rfc3339(stats.created_at.value())),
                last_activity: Some(timestamp_to_rfc3339(stats.last_activity.value())),
                state_count: Some(state_names(stats.state_counts)),
            },
        }
    }
}

impl From<GlobalStats> for http::GlobalStatsResponse {
    fn from(stats: GlobalStats) -> Self {
        Self {
            rooms: http::RoomTotals {
                total: stats.rooms_total,
                active: stats.rooms_active,
                empty: stats.rooms_empty,
            },
            peers: http::PeerTotals {
                total: stats.peers_total,
                average_per_room: stats.average_peers_per_room,
            },
            connection_states: state_names(stats.state_counts),
            storage: http::StorageInfo {
                backend: stats.backend.as_str().to_string(),
            },
        }
    }
}
