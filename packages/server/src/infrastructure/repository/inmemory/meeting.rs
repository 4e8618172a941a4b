//! InMemory Meeting Directory 実装

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{MeetingDirectory, MeetingId, PersistenceError};

/// インメモリ会議ディレクトリ
///
/// `open` の場合はどの会議 ID も存在するものとして扱います（開発用）。
#[derive(Debug, Default)]
pub struct InMemoryMeetingDirectory {
    open: bool,
    meetings: RwLock<HashSet<MeetingId>>,
}

impl InMemoryMeetingDirectory {
    /// すべての会議 ID を受け入れるディレクトリ
    pub fn open() -> Self {
        Self {
            open: true,
            meetings: RwLock::default(),
        }
    }

    /// 登録済みの会議 ID だけを受け入れるディレクトリ
    pub fn with_meetings(meetings: impl IntoIterator<Item = MeetingId>) -> Self {
        Self {
            open: false,
            meetings: RwLock::new(meetings.into_iter().collect()),
        }
    }

    pub async fn add_meeting(&self, meeting_id: MeetingId) {
        self.meetings.write().await.insert(meeting_id);
    }
}

#[async_trait]
impl MeetingDirectory for InMemoryMeetingDirectory {
    async fn meeting_exists(&self, meeting_id: &MeetingId) -> Result<bool, PersistenceError> {
        if self.open {
            return Ok(true);
        }
        Ok(self.meetings.read().await.contains(meeting_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> MeetingId {
        MeetingId::new(value.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_closed_directory_only_knows_registered_meetings() {
        // テスト項目: 登録された会議だけが存在すると判定される
        // given (前提条件):
        let directory = InMemoryMeetingDirectory::with_meetings([id("standup")]);
        directory.add_meeting(id("retro")).await;

        // when (操作) / then (期待する結果):
        assert_eq!(directory.meeting_exists(&id("standup")).await, Ok(true));
        assert_eq!(directory.meeting_exists(&id("retro")).await, Ok(true));
        assert_eq!(directory.meeting_exists(&id("unknown")).await, Ok(false));
    }

    #[tokio::test]
    async fn test_open_directory_accepts_any_meeting() {
        // テスト項目: open なディレクトリはどの会議も存在すると判定する
        // given (前提条件):
        let directory = InMemoryMeetingDirectory::open();

        // when (操作) / then (期待する結果):
        assert_eq!(directory.meeting_exists(&id("anything")).await, Ok(true));
    }
}
