//! UseCase: 外部サービスからの通知
//!
//! チャットの保存などを担当する外部サービスが、書き込み確定後に
//! 会議の参加者（または 1 クライアント）へメッセージを届けるための入口です。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - NotifyParticipantsUseCase::broadcast() / send_to_client() メソッド
//!
//! ### どのような状況を想定しているか
//! - 正常系：会議全体への送信、1 クライアントへの送信
//! - 異常系：宛先のクライアントが接続していない

use std::sync::Arc;

use crate::domain::{ClientId, HubError, SignalingHub, SignalingMessage};

/// 外部サービスからの通知のユースケース
pub struct NotifyParticipantsUseCase {
    /// SignalingHub（ハブへのハンドル）
    hub: Arc<dyn SignalingHub>,
}

impl NotifyParticipantsUseCase {
    /// 新しい NotifyParticipantsUseCase を作成
    pub fn new(hub: Arc<dyn SignalingHub>) -> Self {
        Self { hub }
    }

    /// 会議の全員に送信する（送りっぱなし）
    pub async fn broadcast(&self, message: SignalingMessage) -> Result<(), HubError> {
        tracing::debug!(
            meeting_id = %message.meeting_id,
            kind = message.kind.as_str(),
            "Broadcasting server message"
        );
        self.hub
            .broadcast_to_meeting(message.meeting_id.clone(), message)
            .await
    }

    /// 1 クライアントに送信する
    ///
    /// # Returns
    ///
    /// * `Err(HubError::Send(SendError::NotFound))` - 接続していない
    /// * `Err(HubError::Send(SendError::QueueFull))` - 送信キューが満杯（接続は切断される）
    pub async fn send_to_client(
        &self,
        client_id: ClientId,
        message: SignalingMessage,
    ) -> Result<(), HubError> {
        self.hub.send_to_client(client_id, message).await
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::*;
    use serde_json::json;

    use super::*;
    use crate::domain::{
        MeetingId, MessageKind, MockSignalingHub, SendError, SignalPayload, SignalType, Timestamp,
    };

    fn chat_message() -> SignalingMessage {
        SignalingMessage {
            kind: MessageKind::Known(SignalType::ChatMessage),
            meeting_id: MeetingId::new("m-1".to_string()).unwrap(),
            from: None,
            to: None,
            payload: SignalPayload::Chat(json!({"id": "msg-1", "content": "hello"})),
            timestamp: Timestamp::new(1_700_000_000_000),
        }
    }

    #[tokio::test]
    async fn test_broadcast_targets_message_meeting() {
        // テスト項目: メッセージの会議 ID 宛てにブロードキャストする
        // given (前提条件):
        let message = chat_message();
        let mut hub = MockSignalingHub::new();
        hub.expect_broadcast_to_meeting()
            .with(eq(message.meeting_id.clone()), eq(message.clone()))
            .times(1)
            .returning(|_, _| Ok(()));
        let usecase = NotifyParticipantsUseCase::new(Arc::new(hub));

        // when (操作):
        let result = usecase.broadcast(message).await;

        // then (期待する結果):
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_send_to_missing_client_reports_not_found() {
        // テスト項目: 接続していないクライアントへの送信は NotFound
        // given (前提条件):
        let mut hub = MockSignalingHub::new();
        hub.expect_send_to_client()
            .returning(|id, _| Err(HubError::Send(SendError::NotFound(id.to_string()))));
        let usecase = NotifyParticipantsUseCase::new(Arc::new(hub));

        // when (操作):
        let result = usecase
            .send_to_client(ClientId::new("ghost".to_string()).unwrap(), chat_message())
            .await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(HubError::Send(SendError::NotFound("ghost".to_string())))
        );
    }
}
