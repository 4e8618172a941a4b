//! UseCase: 参加者の退出処理
//!
//! クライアントが `leave` を送ったときの処理です。ハブからの登録解除、
//! 参加者の非アクティブ化、Peer-State からの削除を行います。
//! 永続化に失敗してもライブのルームの後片付けは必ず行います。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - LeaveMeetingUseCase::execute() メソッド
//!
//! ### なぜこのテストが必要か
//! - 永続化の失敗でゴースト接続が残らないことを保証
//! - 置き換え済みの古い接続の退出で、新しい接続の状態を壊さないことを保証
//! - ハブが先に切り離していた接続の退出でも、ピアの状態が残らないことを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：登録中の接続の退出
//! - 異常系：永続化の失敗、既に置き換えられた接続の退出、既に切り離された接続の退出

use std::sync::Arc;

use crate::domain::{
    HubError, LeaveReason, ParticipantRepository, SignalingHub, UnregisterOutcome,
};

use super::{connect_participant::ConnectionTicket, peer_state::PeerStateService};

/// 退出のユースケース
pub struct LeaveMeetingUseCase {
    /// ParticipantRepository（参加者の永続化）
    participants: Arc<dyn ParticipantRepository>,
    /// SignalingHub（ハブへのハンドル）
    hub: Arc<dyn SignalingHub>,
    /// PeerStateService（Peer-State）
    peers: Arc<PeerStateService>,
}

impl LeaveMeetingUseCase {
    /// 新しい LeaveMeetingUseCase を作成
    pub fn new(
        participants: Arc<dyn ParticipantRepository>,
        hub: Arc<dyn SignalingHub>,
        peers: Arc<PeerStateService>,
    ) -> Self {
        Self {
            participants,
            hub,
            peers,
        }
    }

    /// 退出を実行
    ///
    /// # Arguments
    ///
    /// * `ticket` - 退出する接続
    ///
    /// # Returns
    ///
    /// ハブでの登録解除の結果。`Replaced` のときは永続化にも Peer-State にも触れない。
    pub async fn execute(&self, ticket: &ConnectionTicket) -> Result<UnregisterOutcome, HubError> {
        let outcome = self
            .hub
            .unregister(ticket.profile.id.clone(), Some(ticket.token), LeaveReason::Left)
            .await?;
        if !outcome.releases_identity() {
            return Ok(outcome);
        }

        if let Err(err) = self
            .participants
            .set_participant_active(&ticket.meeting_id, &ticket.profile.identity, false)
            .await
        {
            tracing::warn!(
                meeting_id = %ticket.meeting_id,
                client_id = %ticket.profile.id,
                error = %err,
                "Failed to mark participant inactive"
            );
        }

        if let Err(err) = self
            .peers
            .leave(&ticket.meeting_id, &ticket.profile.id)
            .await
        {
            tracing::warn!(
                meeting_id = %ticket.meeting_id,
                client_id = %ticket.profile.id,
                error = %err,
                "Failed to remove peer state"
            );
        }

        tracing::info!(
            meeting_id = %ticket.meeting_id,
            client_id = %ticket.profile.id,
            "Participant left meeting"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use kaigi_shared::time::FixedClock;
    use mockall::predicate::*;

    use super::*;
    use crate::{
        domain::{
            ClientId, ClientProfile, ConnectionToken, DisplayName, Identity, MeetingId,
            MockParticipantRepository, MockSignalingHub, PersistenceError,
        },
        infrastructure::peer_store::InMemoryPeerStore,
    };

    fn ticket() -> ConnectionTicket {
        ConnectionTicket {
            meeting_id: MeetingId::new("m-1".to_string()).unwrap(),
            profile: ClientProfile {
                id: ClientId::new("session_m-1_s1".to_string()).unwrap(),
                identity: Identity::Anonymous,
                display_name: DisplayName::new("Alice".to_string()).unwrap(),
            },
            token: ConnectionToken::new(3),
        }
    }

    async fn joined_peers(ticket: &ConnectionTicket) -> Arc<PeerStateService> {
        let peers = Arc::new(PeerStateService::new(
            Arc::new(InMemoryPeerStore::new()),
            Arc::new(FixedClock::new(1_700_000_000_000)),
            10,
        ));
        peers
            .join(&ticket.meeting_id, &ticket.profile)
            .await
            .unwrap();
        peers
    }

    #[tokio::test]
    async fn test_leave_unregisters_and_marks_inactive() {
        // テスト項目: 退出でハブから登録解除し、参加者を非アクティブにし、Peer-State から消す
        // given (前提条件):
        let ticket = ticket();
        let mut hub = MockSignalingHub::new();
        hub.expect_unregister()
            .with(
                eq(ticket.profile.id.clone()),
                eq(Some(ticket.token)),
                eq(LeaveReason::Left),
            )
            .times(1)
            .returning(|_, _, _| Ok(UnregisterOutcome::Removed));
        let mut participants = MockParticipantRepository::new();
        participants
            .expect_set_participant_active()
            .with(always(), always(), eq(false))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let peers = joined_peers(&ticket).await;
        let usecase = LeaveMeetingUseCase::new(Arc::new(participants), Arc::new(hub), peers.clone());

        // when (操作):
        let result = usecase.execute(&ticket).await;

        // then (期待する結果):
        assert_eq!(result, Ok(UnregisterOutcome::Removed));
        assert!(peers.list_peers(&ticket.meeting_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leave_cleans_up_even_if_persistence_fails() {
        // テスト項目: 永続化に失敗しても Peer-State の後片付けは行われる
        // given (前提条件):
        let ticket = ticket();
        let mut hub = MockSignalingHub::new();
        hub.expect_unregister()
            .returning(|_, _, _| Ok(UnregisterOutcome::Removed));
        let mut participants = MockParticipantRepository::new();
        participants
            .expect_set_participant_active()
            .returning(|_, _, _| Err(PersistenceError::WriteFailed("deadlock".to_string())));
        let peers = joined_peers(&ticket).await;
        let usecase = LeaveMeetingUseCase::new(Arc::new(participants), Arc::new(hub), peers.clone());

        // when (操作):
        let result = usecase.execute(&ticket).await;

        // then (期待する結果):
        assert_eq!(result, Ok(UnregisterOutcome::Removed));
        assert!(peers.list_peers(&ticket.meeting_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leave_of_replaced_connection_touches_nothing() {
        // テスト項目: 置き換え済みの接続の退出は永続化も Peer-State も変更しない
        // given (前提条件):
        let ticket = ticket();
        let mut hub = MockSignalingHub::new();
        hub.expect_unregister()
            .returning(|_, _, _| Ok(UnregisterOutcome::Replaced));
        let mut participants = MockParticipantRepository::new();
        participants.expect_set_participant_active().never();
        let peers = joined_peers(&ticket).await;
        let usecase = LeaveMeetingUseCase::new(Arc::new(participants), Arc::new(hub), peers.clone());

        // when (操作):
        let result = usecase.execute(&ticket).await;

        // then (期待する結果):
        assert_eq!(result, Ok(UnregisterOutcome::Replaced));
        assert_eq!(peers.list_peers(&ticket.meeting_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_leave_after_hub_dropped_connection_still_cleans_up() {
        // テスト項目: ハブが既に切り離していた接続の退出でも、非アクティブ化と Peer-State の削除を行う
        // given (前提条件):
        let ticket = ticket();
        let mut hub = MockSignalingHub::new();
        hub.expect_unregister()
            .returning(|_, _, _| Ok(UnregisterOutcome::AlreadyGone));
        let mut participants = MockParticipantRepository::new();
        participants
            .expect_set_participant_active()
            .with(always(), always(), eq(false))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let peers = joined_peers(&ticket).await;
        let usecase = LeaveMeetingUseCase::new(Arc::new(participants), Arc::new(hub), peers.clone());

        // when (操作):
        let result = usecase.execute(&ticket).await;

        // then (期待する結果):
        assert_eq!(result, Ok(UnregisterOutcome::AlreadyGone));
        assert!(peers.list_peers(&ticket.meeting_id).await.unwrap().is_empty());
    }
}
