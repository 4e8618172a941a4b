//! UseCase: 受信したシグナリングメッセージの中継
//!
//! セッションが受信したメッセージをハブに渡します。offer / answer / ICE の
//! 場合は、先に Peer-State のネゴシエーション開始を記録します。
//! 配信先の決定（ルーム全体、送信者を除く、1 ピア宛て）はハブが行います。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - RelaySignalUseCase::execute() メソッド
//!
//! ### どのような状況を想定しているか
//! - 正常系：offer の中継で Peer-State が connecting になる
//! - エッジケース：チャットの中継では Peer-State を変更しない
//! - 異常系：Peer-State にピアがいなくても中継は行う

use std::sync::Arc;

use crate::domain::{HubError, SignalingHub, SignalingMessage};

use super::{connect_participant::ConnectionTicket, peer_state::PeerStateService};

/// メッセージ中継のユースケース
pub struct RelaySignalUseCase {
    /// SignalingHub（ハブへのハンドル）
    hub: Arc<dyn SignalingHub>,
    /// PeerStateService（Peer-State）
    peers: Arc<PeerStateService>,
}

impl RelaySignalUseCase {
    /// 新しい RelaySignalUseCase を作成
    pub fn new(hub: Arc<dyn SignalingHub>, peers: Arc<PeerStateService>) -> Self {
        Self { hub, peers }
    }

    /// メッセージを中継する
    ///
    /// # Arguments
    ///
    /// * `ticket` - 送信者の接続
    /// * `message` - デコード済みのメッセージ（`from` は送信者で上書き済み）
    pub async fn execute(
        &self,
        ticket: &ConnectionTicket,
        message: SignalingMessage,
    ) -> Result<(), HubError> {
        if message
            .signal_type()
            .is_some_and(|signal| signal.is_negotiation())
            && let Err(err) = self
                .peers
                .note_negotiation(&ticket.meeting_id, &ticket.profile.id)
                .await
        {
            tracing::debug!(
                client_id = %ticket.profile.id,
                error = %err,
                "Could not record negotiation in peer state"
            );
        }

        self.hub.submit(ticket.token, message).await
    }
}

#[cfg(test)]
mod tests {
    use kaigi_shared::time::FixedClock;
    use mockall::predicate::*;
    use serde_json::json;

    use super::*;
    use crate::{
        domain::{
            ClientId, ClientProfile, ConnectionToken, DisplayName, Identity, MeetingId,
            MessageKind, MockSignalingHub, PeerState, SessionDescription, SignalPayload,
            SignalType, Timestamp,
        },
        infrastructure::peer_store::InMemoryPeerStore,
    };

    fn ticket() -> ConnectionTicket {
        ConnectionTicket {
            meeting_id: MeetingId::new("m-1".to_string()).unwrap(),
            profile: ClientProfile {
                id: ClientId::new("alice".to_string()).unwrap(),
                identity: Identity::Anonymous,
                display_name: DisplayName::new("Alice".to_string()).unwrap(),
            },
            token: ConnectionToken::new(5),
        }
    }

    fn message(kind: SignalType, payload: SignalPayload) -> SignalingMessage {
        SignalingMessage {
            kind: MessageKind::Known(kind),
            meeting_id: MeetingId::new("m-1".to_string()).unwrap(),
            from: Some(ClientId::new("alice".to_string()).unwrap()),
            to: Some(ClientId::new("bob".to_string()).unwrap()),
            payload,
            timestamp: Timestamp::new(1_700_000_000_000),
        }
    }

    fn peers() -> Arc<PeerStateService> {
        Arc::new(PeerStateService::new(
            Arc::new(InMemoryPeerStore::new()),
            Arc::new(FixedClock::new(1_700_000_000_000)),
            10,
        ))
    }

    #[tokio::test]
    async fn test_offer_marks_peer_connecting_and_submits() {
        // テスト項目: offer の中継で送信者が connecting になり、トークン付きでハブに渡る
        // given (前提条件):
        let ticket = ticket();
        let peers = peers();
        peers.join(&ticket.meeting_id, &ticket.profile).await.unwrap();
        let mut hub = MockSignalingHub::new();
        hub.expect_submit()
            .with(eq(ConnectionToken::new(5)), always())
            .times(1)
            .returning(|_, _| Ok(()));
        let usecase = RelaySignalUseCase::new(Arc::new(hub), peers.clone());
        let offer = message(
            SignalType::Offer,
            SignalPayload::SessionDescription(SessionDescription {
                sdp: "v=0".to_string(),
                extra: Default::default(),
            }),
        );

        // when (操作):
        usecase.execute(&ticket, offer).await.unwrap();

        // then (期待する結果):
        let record = peers.get(&ticket.meeting_id, &ticket.profile.id).await.unwrap();
        assert_eq!(record.state, PeerState::Connecting);
    }

    #[tokio::test]
    async fn test_chat_leaves_peer_state_untouched() {
        // テスト項目: チャットの中継では Peer-State は new のまま
        // given (前提条件):
        let ticket = ticket();
        let peers = peers();
        peers.join(&ticket.meeting_id, &ticket.profile).await.unwrap();
        let mut hub = MockSignalingHub::new();
        hub.expect_submit().times(1).returning(|_, _| Ok(()));
        let usecase = RelaySignalUseCase::new(Arc::new(hub), peers.clone());
        let chat = message(SignalType::ChatMessage, SignalPayload::Chat(json!({"text": "hi"})));

        // when (操作):
        usecase.execute(&ticket, chat).await.unwrap();

        // then (期待する結果):
        let record = peers.get(&ticket.meeting_id, &ticket.profile.id).await.unwrap();
        assert_eq!(record.state, PeerState::New);
    }

    #[tokio::test]
    async fn test_relay_without_peer_record_still_submits() {
        // テスト項目: Peer-State にピアがいなくても中継は行われる
        // given (前提条件):
        let mut hub = MockSignalingHub::new();
        hub.expect_submit().times(1).returning(|_, _| Ok(()));
        let usecase = RelaySignalUseCase::new(Arc::new(hub), peers());
        let answer = message(
            SignalType::Answer,
            SignalPayload::SessionDescription(SessionDescription {
                sdp: "v=0".to_string(),
                extra: Default::default(),
            }),
        );

        // when (操作):
        let result = usecase.execute(&ticket(), answer).await;

        // then (期待する結果):
        assert!(result.is_ok());
    }
}
