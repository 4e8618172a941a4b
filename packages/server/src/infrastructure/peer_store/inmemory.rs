//! InMemory Peer Store 実装
//!
//! プロセス内の HashMap にピアルームを保持します。単一インスタンスでの運用と、
//! 永続バックエンドが使えないときのフォールバックに使います。

use std::collections::{HashMap, hash_map::Entry};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    ClientId, ClientProfile, MeetingId, PeerRecord, PeerRoom, PeerState, PeerStore,
    PeerStoreError, StoreBackend, SweepPolicy, SweepReport, Timestamp,
};

/// インメモリ Peer Store 実装
#[derive(Debug, Default)]
pub struct InMemoryPeerStore {
    rooms: Mutex<HashMap<MeetingId, PeerRoom>>,
}

impl InMemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 別の保存先から読み出したルームを取り込む
    ///
    /// 既にあるルームは上書きしない。
    pub async fn restore(&self, snapshot: Vec<PeerRoom>) -> usize {
        let mut rooms = self.rooms.lock().await;
        let mut restored = 0;
        for room in snapshot {
            if let Entry::Vacant(entry) = rooms.entry(room.meeting_id.clone()) {
                entry.insert(room);
                restored += 1;
            }
        }
        restored
    }
}

fn room_not_found(meeting_id: &MeetingId) -> PeerStoreError {
    PeerStoreError::RoomNotFound(meeting_id.to_string())
}

#[async_trait]
impl PeerStore for InMemoryPeerStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn join(
        &self,
        meeting_id: &MeetingId,
        profile: &ClientProfile,
        max_peers: usize,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .entry(meeting_id.clone())
            .or_insert_with(|| PeerRoom::new(meeting_id.clone(), now));
        room.join(profile, max_peers, now)
    }

    async fn leave(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        now: Timestamp,
    ) -> Result<Option<PeerRecord>, PeerStoreError> {
        let mut rooms = self.rooms.lock().await;
        Ok(rooms
            .get_mut(meeting_id)
            .and_then(|room| room.leave(peer_id, now)))
    }

    async fn update_state(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        state: PeerState,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .get_mut(meeting_id)
            .ok_or_else(|| room_not_found(meeting_id))?
            .update_state(peer_id, state, now)
    }

    async fn touch(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        now: Timestamp,
    ) -> Result<(), PeerStoreError> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .get_mut(meeting_id)
            .ok_or_else(|| room_not_found(meeting_id))?
            .touch(peer_id, now)
    }

    async fn get(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
    ) -> Result<PeerRecord, PeerStoreError> {
        let rooms = self.rooms.lock().await;
        let room = rooms
            .get(meeting_id)
            .ok_or_else(|| room_not_found(meeting_id))?;
        room.peers
            .get(peer_id)
            .cloned()
            .ok_or_else(|| PeerStoreError::PeerNotFound {
                meeting_id: meeting_id.to_string(),
                peer_id: peer_id.to_string(),
            })
    }

    async fn list_peers(&self, meeting_id: &MeetingId) -> Result<Vec<PeerRecord>, PeerStoreError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms
            .get(meeting_id)
            .map(|room| room.peers.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn room(&self, meeting_id: &MeetingId) -> Result<Option<PeerRoom>, PeerStoreError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms.get(meeting_id).cloned())
    }

    async fn rooms(&self) -> Result<Vec<PeerRoom>, PeerStoreError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms.values().cloned().collect())
    }

    async fn sweep(
        &self,
        now: Timestamp,
        policy: &SweepPolicy,
    ) -> Result<SweepReport, PeerStoreError> {
        let mut rooms = self.rooms.lock().await;
        let mut report = SweepReport::default();
        rooms.retain(|meeting_id, room| {
            let sweep = room.sweep(now, policy);
            report.evicted.extend(sweep.evicted);
            if sweep.remove_room {
                report.removed_rooms.push(meeting_id.clone());
            }
            !sweep.remove_room
        });
        Ok(report)
    }
}
