//! Signaling message model.
//!
//! Messages are modelled as a tag ([`MessageKind`]) plus one payload shape per
//! kind ([`SignalPayload`]). Unknown tags are kept as [`MessageKind::Unknown`]
//! with an opaque payload so they can be logged and dropped without killing
//! the connection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ClientId, ClientProfile, MeetingId, Timestamp};

/// Known signaling message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalType {
    Join,
    Leave,
    Offer,
    Answer,
    IceCandidate,
    ParticipantJoined,
    ParticipantLeft,
    ChatMessage,
    #[serde(alias = "chat-message-edit")]
    ChatEdit,
    #[serde(alias = "chat-message-delete")]
    ChatDelete,
    ChatReaction,
    ChatReadStatus,
    ChatTyping,
    ChatTypingStop,
}

/// How the router delivers a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to the single peer named in `to`.
    Direct,
    /// Sent to every room member, sender included.
    RoomWithSender,
    /// Sent to every room member except the sender.
    RoomExceptSender,
    /// Changes membership instead of being relayed.
    Membership,
    /// Only the server may emit it; dropped when a client sends it.
    ServerOnly,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::ParticipantJoined => "participant-joined",
            Self::ParticipantLeft => "participant-left",
            Self::ChatMessage => "chat-message",
            Self::ChatEdit => "chat-edit",
            Self::ChatDelete => "chat-delete",
            Self::ChatReaction => "chat-reaction",
            Self::ChatReadStatus => "chat-read-status",
            Self::ChatTyping => "chat-typing",
            Self::ChatTypingStop => "chat-typing-stop",
        }
    }

    /// Parse a wire tag, accepting the legacy `chat-message-edit` and
    /// `chat-message-delete` spellings.
    pub fn parse(tag: &str) -> Option<Self> {
        let kind = match tag {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "offer" => Self::Offer,
            "answer" => Self::Answer,
            "ice-candidate" => Self::IceCandidate,
            "participant-joined" => Self::ParticipantJoined,
            "participant-left" => Self::ParticipantLeft,
            "chat-message" => Self::ChatMessage,
            "chat-edit" | "chat-message-edit" => Self::ChatEdit,
            "chat-delete" | "chat-message-delete" => Self::ChatDelete,
            "chat-reaction" => Self::ChatReaction,
            "chat-read-status" => Self::ChatReadStatus,
            "chat-typing" => Self::ChatTyping,
            "chat-typing-stop" => Self::ChatTypingStop,
            _ => return None,
        };
        Some(kind)
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            Self::Offer | Self::Answer | Self::IceCandidate => Delivery::Direct,
            Self::ChatMessage
            | Self::ChatEdit
            | Self::ChatDelete
            | Self::ChatReaction
            | Self::ChatReadStatus => Delivery::RoomWithSender,
            Self::ChatTyping | Self::ChatTypingStop => Delivery::RoomExceptSender,
            Self::Join | Self::Leave => Delivery::Membership,
            Self::ParticipantJoined | Self::ParticipantLeft => Delivery::ServerOnly,
        }
    }

    /// Whether the type is part of the WebRTC offer/answer/ICE exchange.
    pub fn is_negotiation(&self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }
}

/// Tag of a message as received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Known(SignalType),
    Unknown(String),
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Self {
        SignalType::parse(tag).map_or_else(|| Self::Unknown(tag.to_string()), Self::Known)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(kind) => kind.as_str(),
            Self::Unknown(tag) => tag,
        }
    }

    pub fn known(&self) -> Option<SignalType> {
        match self {
            Self::Known(kind) => Some(*kind),
            Self::Unknown(_) => None,
        }
    }
}

/// SDP carried by `offer` and `answer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    /// Any other fields (e.g. the browser's `type`) are relayed untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Candidate carried by `ice-candidate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Describes a room member in `participant-joined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPayload {
    pub participant_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_authenticated: bool,
}

/// Names the member that went away in `participant-left`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub participant_id: String,
}

/// Typing indicator, enriched by the router with the sender's identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub public_user_id: Option<Uuid>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Type-specific message body.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    Empty,
    SessionDescription(SessionDescription),
    IceCandidate(IceCandidate),
    Participant(ParticipantPayload),
    ParticipantLeft(LeavePayload),
    /// Chat bodies are owned by the chat service and relayed as-is.
    Chat(Value),
    Typing(TypingPayload),
    /// Body of an unknown message type.
    Raw(Value),
}

/// A message flowing through the signaling router.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    pub kind: MessageKind,
    pub meeting_id: MeetingId,
    /// Sender; `None` for messages originated by the server.
    pub from: Option<ClientId>,
    /// Target of a direct message; `None` means the room.
    pub to: Option<ClientId>,
    pub payload: SignalPayload,
    pub timestamp: Timestamp,
}

impl SignalingMessage {
    pub fn signal_type(&self) -> Option<SignalType> {
        self.kind.known()
    }

    /// `participant-joined` describing `member`, addressed from that member.
    pub fn participant_joined(
        meeting_id: MeetingId,
        member: &ClientProfile,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            kind: MessageKind::Known(SignalType::ParticipantJoined),
            meeting_id,
            from: Some(member.id.clone()),
            to: None,
            payload: SignalPayload::Participant(ParticipantPayload {
                participant_id: member.id.as_str().to_string(),
                name: member.display_name.as_str().to_string(),
                avatar_url: None,
                is_authenticated: member.is_authenticated(),
            }),
            timestamp,
        }
    }

    /// `participant-left` for `client_id`, addressed from that client.
    pub fn participant_left(meeting_id: MeetingId, client_id: &ClientId, timestamp: Timestamp) -> Self {
        Self {
            kind: MessageKind::Known(SignalType::ParticipantLeft),
            meeting_id,
            from: Some(client_id.clone()),
            to: None,
            payload: SignalPayload::ParticipantLeft(LeavePayload {
                participant_id: client_id.as_str().to_string(),
            }),
            timestamp,
        }
    }
}
