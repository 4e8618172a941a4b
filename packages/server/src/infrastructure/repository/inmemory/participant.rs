//! InMemory Participant Repository 実装

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Identity, MeetingId, ParticipantRepository, PersistenceError};

/// インメモリ参加者リポジトリ
///
/// 匿名の参加者には永続化する行が無いため、何もしません。
#[derive(Debug, Default)]
pub struct InMemoryParticipantRepository {
    active: Mutex<HashMap<(MeetingId, Identity), bool>>,
}

impl InMemoryParticipantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 記録されているアクティブ状態
    pub async fn is_active(&self, meeting_id: &MeetingId, identity: &Identity) -> Option<bool> {
        self.active
            .lock()
            .await
            .get(&(meeting_id.clone(), *identity))
            .copied()
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryParticipantRepository {
    async fn set_participant_active(
        &self,
        meeting_id: &MeetingId,
        identity: &Identity,
        active: bool,
    ) -> Result<(), PersistenceError> {
        if matches!(identity, Identity::Anonymous) {
            return Ok(());
        }
        self.active
            .lock()
            .await
            .insert((meeting_id.clone(), *identity), active);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_records_active_flag_per_identity() {
        // テスト項目: 本人ごとのアクティブ状態が記録され、匿名は記録されない
        // given (前提条件):
        let repo = InMemoryParticipantRepository::new();
        let meeting = MeetingId::new("m-1".to_string()).unwrap();
        let user = Identity::User(Uuid::new_v4());

        // when (操作):
        repo.set_participant_active(&meeting, &user, true)
            .await
            .unwrap();
        repo.set_participant_active(&meeting, &user, false)
            .await
            .unwrap();
        repo.set_participant_active(&meeting, &Identity::Anonymous, true)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(repo.is_active(&meeting, &user).await, Some(false));
        assert_eq!(repo.is_active(&meeting, &Identity::Anonymous).await, None);
    }
}
