//! UseCase: 会議の参加状況の取得
//!
//! ハブに問い合わせるだけの薄い UseCase です。問い合わせはハブのイベントループで
//! 直列に処理されるため、それまでに受け付けた登録・登録解除を反映した値になります。

use std::sync::Arc;

use crate::domain::{ClientSummary, HubError, MeetingId, SignalingHub};

/// 会議の状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingStatus {
    pub meeting_id: MeetingId,
    pub active: bool,
    pub participant_count: usize,
}

/// 会議の参加状況取得のユースケース
pub struct MeetingStatusUseCase {
    /// SignalingHub（ハブへのハンドル）
    hub: Arc<dyn SignalingHub>,
}

impl MeetingStatusUseCase {
    /// 新しい MeetingStatusUseCase を作成
    pub fn new(hub: Arc<dyn SignalingHub>) -> Self {
        Self { hub }
    }

    /// 参加者一覧（接続順は保証しない）
    pub async fn participants(&self, meeting_id: &MeetingId) -> Result<Vec<ClientSummary>, HubError> {
        self.hub.participants(meeting_id.clone()).await
    }

    pub async fn participant_count(&self, meeting_id: &MeetingId) -> Result<usize, HubError> {
        self.hub.participant_count(meeting_id.clone()).await
    }

    pub async fn is_active(&self, meeting_id: &MeetingId) -> Result<bool, HubError> {
        self.hub.is_meeting_active(meeting_id.clone()).await
    }

    /// アクティブかどうかと人数をまとめて返す
    pub async fn status(&self, meeting_id: &MeetingId) -> Result<MeetingStatus, HubError> {
        let participant_count = self.participant_count(meeting_id).await?;
        Ok(MeetingStatus {
            meeting_id: meeting_id.clone(),
            active: participant_count > 0,
            participant_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::*;

    use super::*;
    use crate::domain::MockSignalingHub;

    fn meeting() -> MeetingId {
        MeetingId::new("m-1".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_count_and_activity() {
        // テスト項目: 人数が 1 以上ならアクティブとして返す
        // given (前提条件):
        let mut hub = MockSignalingHub::new();
        hub.expect_participant_count()
            .with(eq(meeting()))
            .returning(|_| Ok(3));
        let usecase = MeetingStatusUseCase::new(Arc::new(hub));

        // when (操作):
        let status = usecase.status(&meeting()).await.unwrap();

        // then (期待する結果):
        assert_eq!(
            status,
            MeetingStatus {
                meeting_id: meeting(),
                active: true,
                participant_count: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_status_of_empty_meeting_is_inactive() {
        // テスト項目: 人数 0 の会議は非アクティブ
        // given (前提条件):
        let mut hub = MockSignalingHub::new();
        hub.expect_participant_count().returning(|_| Ok(0));
        let usecase = MeetingStatusUseCase::new(Arc::new(hub));

        // when (操作):
        let status = usecase.status(&meeting()).await.unwrap();

        // then (期待する結果):
        assert!(!status.active);
    }

    #[tokio::test]
    async fn test_queries_propagate_stopped_hub() {
        // テスト項目: ハブが停止していればエラーを返す
        // given (前提条件):
        let mut hub = MockSignalingHub::new();
        hub.expect_participants()
            .returning(|_| Err(HubError::Stopped));
        let usecase = MeetingStatusUseCase::new(Arc::new(hub));

        // when (操作):
        let result = usecase.participants(&meeting()).await;

        // then (期待する結果):
        assert_eq!(result, Err(HubError::Stopped));
    }
}
