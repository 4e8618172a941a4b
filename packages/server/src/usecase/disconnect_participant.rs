//! UseCase: 参加者切断処理
//!
//! セッションのトランスポートが閉じた（読み込みエラー、クローズ、
//! 生存確認のタイムアウト）ときの処理です。`leave` と違い、参加者の
//! 永続化された状態には触れません。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - DisconnectParticipantUseCase::execute() メソッド
//!
//! ### なぜこのテストが必要か
//! - 切断と `leave` が競合しても、後片付けが冪等で失敗しないことを保証
//! - 再接続で置き換えられた古い接続の切断が、新しいピアを消さないことを保証
//! - 送信キューの詰まりでハブが先に切り離した接続のピアが残り続けないことを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：登録中の接続の切断
//! - エッジケース：`leave` 済み、ハブが切り離し済み、または置き換え済みの接続の切断

use std::sync::Arc;

use crate::domain::{HubError, LeaveReason, SignalingHub, UnregisterOutcome};

use super::{connect_participant::ConnectionTicket, peer_state::PeerStateService};

/// 参加者切断のユースケース
pub struct DisconnectParticipantUseCase {
    /// SignalingHub（ハブへのハンドル）
    hub: Arc<dyn SignalingHub>,
    /// PeerStateService（Peer-State）
    peers: Arc<PeerStateService>,
}

impl DisconnectParticipantUseCase {
    /// 新しい DisconnectParticipantUseCase を作成
    pub fn new(hub: Arc<dyn SignalingHub>, peers: Arc<PeerStateService>) -> Self {
        Self { hub, peers }
    }

    /// 参加者切断を実行
    ///
    /// # Arguments
    ///
    /// * `ticket` - 切断された接続
    ///
    /// # Returns
    ///
    /// ハブでの登録解除の結果。`Replaced` のときは Peer-State に触れない
    /// （同じ ID のピアは新しい接続のもの）。
    pub async fn execute(&self, ticket: &ConnectionTicket) -> Result<UnregisterOutcome, HubError> {
        let outcome = self
            .hub
            .unregister(
                ticket.profile.id.clone(),
                Some(ticket.token),
                LeaveReason::Disconnected,
            )
            .await?;
        if !outcome.releases_identity() {
            tracing::debug!(
                client_id = %ticket.profile.id,
                token = %ticket.token,
                "Disconnect of a replaced connection"
            );
            return Ok(outcome);
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
            outcome = ?outcome,
            "Participant disconnected"
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
            MockSignalingHub,
        },
        infrastructure::peer_store::InMemoryPeerStore,
    };

    fn ticket() -> ConnectionTicket {
        ConnectionTicket {
            meeting_id: MeetingId::new("m-1".to_string()).unwrap(),
            profile: ClientProfile {
                id: ClientId::new("session_m-1_s1".to_string()).unwrap(),
                identity: Identity::Anonymous,
                display_name: DisplayName::new("Bob".to_string()).unwrap(),
            },
            token: ConnectionToken::new(9),
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
    async fn test_disconnect_unregisters_with_token() {
        // テスト項目: 切断はトークン付きで登録解除し、Peer-State からも消す
        // given (前提条件):
        let ticket = ticket();
        let mut hub = MockSignalingHub::new();
        hub.expect_unregister()
            .with(
                eq(ticket.profile.id.clone()),
                eq(Some(ConnectionToken::new(9))),
                eq(LeaveReason::Disconnected),
            )
            .times(1)
            .returning(|_, _, _| Ok(UnregisterOutcome::Removed));
        let peers = joined_peers(&ticket).await;
        let usecase = DisconnectParticipantUseCase::new(Arc::new(hub), peers.clone());

        // when (操作):
        let result = usecase.execute(&ticket).await;

        // then (期待する結果):
        assert_eq!(result, Ok(UnregisterOutcome::Removed));
        assert!(peers.list_peers(&ticket.meeting_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_of_stale_connection_keeps_successor_peer() {
        // テスト項目: 置き換え済みの接続が切断されても、同じ ID の新しいピアは残る
        // given (前提条件):
        let ticket = ticket();
        let mut hub = MockSignalingHub::new();
        hub.expect_unregister()
            .returning(|_, _, _| Ok(UnregisterOutcome::Replaced));
        let peers = joined_peers(&ticket).await;
        let usecase = DisconnectParticipantUseCase::new(Arc::new(hub), peers.clone());

        // when (操作):
        let result = usecase.execute(&ticket).await;

        // then (期待する結果):
        assert_eq!(result, Ok(UnregisterOutcome::Replaced));
        assert!(peers.get(&ticket.meeting_id, &ticket.profile.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_after_hub_dropped_connection_removes_peer() {
        // テスト項目: ハブが送信キューの詰まりで先に切り離していた接続でも、切断時にピアを消す
        // given (前提条件):
        let ticket = ticket();
        let mut hub = MockSignalingHub::new();
        hub.expect_unregister()
            .times(1)
            .returning(|_, _, _| Ok(UnregisterOutcome::AlreadyGone));
        let peers = joined_peers(&ticket).await;
        let usecase = DisconnectParticipantUseCase::new(Arc::new(hub), peers.clone());

        // when (操作):
        let result = usecase.execute(&ticket).await;

        // then (期待する結果):
        assert_eq!(result, Ok(UnregisterOutcome::AlreadyGone));
        assert!(peers.list_peers(&ticket.meeting_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_reports_stopped_hub() {
        // テスト項目: ハブが停止していればエラーを返す
        // given (前提条件):
        let ticket = ticket();
        let mut hub = MockSignalingHub::new();
        hub.expect_unregister()
            .returning(|_, _, _| Err(HubError::Stopped));
        let peers = joined_peers(&ticket).await;
        let usecase = DisconnectParticipantUseCase::new(Arc::new(hub), peers);

        // when (操作):
        let result = usecase.execute(&ticket).await;

        // then (期待する結果):
        assert_eq!(result, Err(HubError::Stopped));
    }
}
