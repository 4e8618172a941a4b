//! UseCase layer
//!
//! ドメインの trait（`SignalingHub`, `PeerStore`, 各コラボレーター）だけに依存し、
//! 接続、中継、退出、切断、Peer-State、スイープ、問い合わせの手順を組み立てます。

mod connect_participant;
mod disconnect_participant;
mod error;
mod leave_meeting;
mod meeting_status;
mod notify_participants;
mod peer_state;
mod relay_signal;
mod sweep_peers;

pub use connect_participant::{ConnectParticipantUseCase, ConnectionPlan, ConnectionTicket};
pub use disconnect_participant::DisconnectParticipantUseCase;
pub use error::ConnectError;
pub use leave_meeting::LeaveMeetingUseCase;
pub use meeting_status::{MeetingStatus, MeetingStatusUseCase};
pub use notify_participants::NotifyParticipantsUseCase;
pub use peer_state::PeerStateService;
pub use relay_signal::RelaySignalUseCase;
pub use sweep_peers::SweepPeersUseCase;
