//! Domain layer
//!
//! 値オブジェクト、本人確認、シグナリングメッセージ、Peer-State のモデルと、
//! 外部コラボレーターの trait を定義します。

pub mod error;
pub mod hub;
pub mod identity;
pub mod message;
pub mod peer;
pub mod repository;
pub mod value_object;

pub use error::{DomainError, HubError, PeerStoreError, PersistenceError, SendError};
pub use hub::{
    ClientSummary, LeaveReason, OutboundFrame, OutboundSender, SignalingHub, UnregisterOutcome,
};
pub use identity::{
    ClientProfile, IdSource, Identity, IdentityHints, ResolvedIdentity, choose_display_name,
    derive_client_id, fallback_display_name,
};
pub use message::{
    Delivery, IceCandidate, LeavePayload, MessageKind, ParticipantPayload, SessionDescription,
    SignalPayload, SignalType, SignalingMessage, TypingPayload,
};
pub use peer::{
    GlobalStats, PeerRecord, PeerRoom, PeerState, RoomStats, RoomSweep, StoreBackend, SweepPolicy,
    SweepReport,
};
pub use repository::{IdentityResolver, MeetingDirectory, ParticipantRepository, PeerStore};
pub use value_object::{ClientId, ConnectionToken, DisplayName, MeetingId, Timestamp};

#[cfg(test)]
pub use hub::MockSignalingHub;
#[cfg(test)]
pub use repository::{
    MockIdentityResolver, MockMeetingDirectory, MockParticipantRepository, MockPeerStore,
};
