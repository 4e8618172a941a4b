//! Room Directory
//!
//! 会議 ID → 参加中のクライアント ID の集合。
//! メンバーが 0 人になったルームは即座に削除します。

use std::collections::{HashMap, HashSet};

use crate::domain::{ClientId, MeetingId};

#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<MeetingId, HashSet<ClientId>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// ルームに追加する（ルームが無ければ作成）。既に居れば false
    pub fn join(&mut self, meeting_id: &MeetingId, client_id: &ClientId) -> bool {
        self.rooms
            .entry(meeting_id.clone())
            .or_default()
            .insert(client_id.clone())
    }

    /// ルームから外す。空になったルームは削除する。居なければ false
    pub fn leave(&mut self, meeting_id: &MeetingId, client_id: &ClientId) -> bool {
        let Some(members) = self.rooms.get_mut(meeting_id) else {
            return false;
        };
        let removed = members.remove(client_id);
        if members.is_empty() {
            self.rooms.remove(meeting_id);
        }
        removed
    }

    /// メンバーのスナップショット
    ///
    /// コピーを返すので、走査中にメンバーシップを変更しても安全です。
    pub fn members_of(&self, meeting_id: &MeetingId) -> Vec<ClientId> {
        self.rooms
            .get(meeting_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, meeting_id: &MeetingId, client_id: &ClientId) -> bool {
        self.rooms
            .get(meeting_id)
            .is_some_and(|members| members.contains(client_id))
    }

    pub fn count(&self, meeting_id: &MeetingId) -> usize {
        self.rooms.get(meeting_id).map_or(0, HashSet::len)
    }

    pub fn is_active(&self, meeting_id: &MeetingId) -> bool {
        self.count(meeting_id) > 0
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
