//! Shared application state.

use std::sync::Arc;

use kaigi_shared::time::Clock;

use crate::usecase::{
    ConnectParticipantUseCase, DisconnectParticipantUseCase, LeaveMeetingUseCase,
    MeetingStatusUseCase, NotifyParticipantsUseCase, PeerStateService, RelaySignalUseCase,
};

use super::session::SessionTimeouts;

/// Shared application state
pub struct AppState {
    /// ConnectParticipantUseCase（参加者接続のユースケース）
    pub connect_participant_usecase: Arc<ConnectParticipantUseCase>,
    /// RelaySignalUseCase（メッセージ中継のユースケース）
    pub relay_signal_usecase: Arc<RelaySignalUseCase>,
    /// LeaveMeetingUseCase（退出のユースケース）
    pub leave_meeting_usecase: Arc<LeaveMeetingUseCase>,
    /// DisconnectParticipantUseCase（参加者切断のユースケース）
    pub disconnect_participant_usecase: Arc<DisconnectParticipantUseCase>,
    /// MeetingStatusUseCase（参加状況取得のユースケース）
    pub meeting_status_usecase: Arc<MeetingStatusUseCase>,
    /// NotifyParticipantsUseCase（外部サービスからの通知のユースケース）
    pub notify_participants_usecase: Arc<NotifyParticipantsUseCase>,
    /// PeerStateService（Peer-State）
    pub peer_state: Arc<PeerStateService>,
    /// Clock（時刻の抽象化）
    pub clock: Arc<dyn Clock>,
    /// 1 接続あたりの送信キューの容量
    pub outbound_capacity: usize,
    /// セッションのタイムアウト
    pub timeouts: SessionTimeouts,
}
