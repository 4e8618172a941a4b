//! Peer-State モデル
//!
//! シグナリング用の WebSocket とは独立して、WebRTC レベルのピア状態
//! (new → connecting → connected → disconnected / failed / closed) を保持します。
//! 再ネゴシエーションや監視は、ソケットの内部に依存せずにここを参照します。

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use uuid::Uuid;

use super::{ClientId, ClientProfile, DomainError, MeetingId, PeerStoreError, Timestamp};

/// WebRTC peer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    pub const ALL: [PeerState; 6] = [
        PeerState::New,
        PeerState::Connecting,
        PeerState::Connected,
        PeerState::Disconnected,
        PeerState::Failed,
        PeerState::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// 接続が終わっている状態か（再参加で `New` に戻す対象）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl FromStr for PeerState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::InvalidPeerState(s.to_string()))
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One peer in a peer room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: ClientId,
    pub meeting_id: MeetingId,
    pub user_id: Option<Uuid>,
    pub public_user_id: Option<Uuid>,
    pub name: String,
    pub is_authenticated: bool,
    pub state: PeerState,
    pub joined_at: Timestamp,
    pub last_seen: Timestamp,
}

impl PeerRecord {
    pub fn new(meeting_id: MeetingId, profile: &ClientProfile, now: Timestamp) -> Self {
        Self {
            id: profile.id.clone(),
            meeting_id,
            user_id: profile.identity.user_id(),
            public_user_id: profile.identity.public_user_id(),
            name: profile.display_name.as_str().to_string(),
            is_authenticated: profile.is_authenticated(),
            state: PeerState::New,
            joined_at: now,
            last_seen: now,
        }
    }

    /// `now` 時点で `threshold` より長く応答がないか
    pub fn is_idle(&self, now: Timestamp, threshold: Duration) -> bool {
        self.last_seen.elapsed_until(now) > duration_millis(threshold)
    }
}

/// Eviction sweep tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Peers (and non-empty rooms) idle longer than this are removed.
    pub inactivity_threshold: Duration,
    /// Empty rooms older than this are removed.
    pub empty_room_timeout: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            inactivity_threshold: Duration::from_secs(600),
            empty_room_timeout: Duration::from_secs(180),
        }
    }
}

/// Result of sweeping one room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSweep {
    pub evicted: Vec<PeerRecord>,
    pub remove_room: bool,
}

/// Result of sweeping a whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<PeerRecord>,
    pub removed_rooms: Vec<MeetingId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.removed_rooms.is_empty()
    }
}

/// Per-room statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStats {
    pub meeting_id: MeetingId,
    pub peer_count: usize,
    pub state_counts: BTreeMap<PeerState, usize>,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
}

/// Storage backend currently serving peer-state operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Statistics across every peer room.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStats {
    pub rooms_total: usize,
    pub rooms_active: usize,
    pub rooms_empty: usize,
    pub peers_total: usize,
    pub average_peers_per_room: f64,
    pub state_counts: BTreeMap<PeerState, usize>,
    pub backend: StoreBackend,
}

impl GlobalStats {
    /// 全ルームの一覧から集計する
    pub fn collect(rooms: &[PeerRoom], backend: StoreBackend) -> Self {
        let rooms_total = rooms.len();
        let active: Vec<&PeerRoom> = rooms.iter().filter(|room| !room.is_empty()).collect();
        let peers_total: usize = active.iter().map(|room| room.peer_count()).sum();
        let mut state_counts = BTreeMap::new();
        for peer in rooms.iter().flat_map(|room| room.peers.values()) {
            *state_counts.entry(peer.state).or_insert(0) += 1;
        }
        Self {
            rooms_total,
            rooms_active: active.len(),
            rooms_empty: rooms_total - active.len(),
            peers_total,
            average_peers_per_room: peers_total as f64 / active.len().max(1) as f64,
            state_counts,
            backend,
        }
    }
}

/// Peer room: peer metadata kept for one meeting.
///
/// シグナリング側のルームと違い、空になってもすぐには削除せず、
/// スイープで `empty_room_timeout` を過ぎたものだけを削除します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRoom {
    pub meeting_id: MeetingId,
    pub peers: BTreeMap<ClientId, PeerRecord>,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
}

impl PeerRoom {
    pub fn new(meeting_id: MeetingId, now: Timestamp) -> Self {
        Self {
            meeting_id,
            peers: BTreeMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// ピアを参加させる
    ///
    /// 既に参加済みなら既存のレコードを返す（冪等）。終了状態のピアは
    /// `New` に戻す。新規参加で `max_peers` を超える場合は `RoomFull`。
    pub fn join(
        &mut self,
        profile: &ClientProfile,
        max_peers: usize,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError> {
        if let Some(existing) = self.peers.get_mut(&profile.id) {
            if existing.state.is_terminal() {
                existing.state = PeerState::New;
            }
            existing.last_seen = now;
            let record = existing.clone();
            self.last_activity = now;
            return Ok(record);
        }
        if self.peers.len() >= max_peers {
            return Err(PeerStoreError::RoomFull {
                meeting_id: self.meeting_id.to_string(),
                max: max_peers,
            });
        }
        let record = PeerRecord::new(self.meeting_id.clone(), profile, now);
        self.peers.insert(record.id.clone(), record.clone());
        self.last_activity = now;
        Ok(record)
    }

    /// ピアを退出させる。いなければ `None`
    pub fn leave(&mut self, peer_id: &ClientId, now: Timestamp) -> Option<PeerRecord> {
        let removed = self.peers.remove(peer_id);
        if removed.is_some() {
            self.last_activity = now;
        }
        removed
    }

    pub fn update_state(
        &mut self,
        peer_id: &ClientId,
        state: PeerState,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError> {
        let peer = self.peer_mut(peer_id)?;
        peer.state = state;
        peer.last_seen = now;
        let record = peer.clone();
        self.last_activity = now;
        Ok(record)
    }

    /// 生存確認を記録する（`last_seen` の更新のみ）
    pub fn touch(&mut self, peer_id: &ClientId, now: Timestamp) -> Result<(), PeerStoreError> {
        self.peer_mut(peer_id)?.last_seen = now;
        self.last_activity = now;
        Ok(())
    }

    /// アイドルなピアを追い出し、ルーム自体を削除すべきか判定する
    ///
    /// - `last_seen` が `inactivity_threshold` を超えたピアを削除
    /// - 空のルームは `last_activity` から `empty_room_timeout` を超えたら削除
    /// - 空でないルームも `inactivity_threshold` を超えて活動がなければ、
    ///   残りのピアごと削除
    pub fn sweep(&mut self, now: Timestamp, policy: &SweepPolicy) -> RoomSweep {
        let idle: Vec<ClientId> = self
            .peers
            .values()
            .filter(|peer| peer.is_idle(now, policy.inactivity_threshold))
            .map(|peer| peer.id.clone())
            .collect();
        let mut evicted: Vec<PeerRecord> = idle
            .iter()
            .filter_map(|id| self.peers.remove(id))
            .collect();

        let quiet_for = self.last_activity.elapsed_until(now);
        let remove_room = if self.peers.is_empty() {
            quiet_for > duration_millis(policy.empty_room_timeout)
        } else if quiet_for > duration_millis(policy.inactivity_threshold) {
            evicted.extend(std::mem::take(&mut self.peers).into_values());
            true
        } else {
            false
        };

        RoomSweep {
            evicted,
            remove_room,
        }
    }

    pub fn stats(&self) -> RoomStats {
        let mut state_counts = BTreeMap::new();
        for peer in self.peers.values() {
            *state_counts.entry(peer.state).or_insert(0) += 1;
        }
        RoomStats {
            meeting_id: self.meeting_id.clone(),
            peer_count: self.peers.len(),
            state_counts,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    fn peer_mut(&mut self, peer_id: &ClientId) -> Result<&mut PeerRecord, PeerStoreError> {
        let meeting_id = self.meeting_id.to_string();
        self.peers
            .get_mut(peer_id)
            .ok_or_else(|| PeerStoreError::PeerNotFound {
                meeting_id,
                peer_id: peer_id.to_string(),
            })
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DisplayName, Identity};

    const MINUTE: i64 = 60_000;

    fn meeting() -> MeetingId {
        MeetingId::new("m-1".to_string()).unwrap()
    }

    fn profile(id: &str) -> ClientProfile {
        ClientProfile {
            id: ClientId::new(id.to_string()).unwrap(),
            identity: Identity::Anonymous,
            display_name: DisplayName::new(format!("name {id}")).unwrap(),
        }
    }

    #[test]
    fn test_peer_state_parse() {
        // テスト項目: 文字列からピア状態を解釈でき、未知の値はエラーになる
        // given (前提条件) / when (操作) / then (期待する結果):
        assert_eq!("connected".parse::<PeerState>(), Ok(PeerState::Connected));
        assert_eq!("closed".parse::<PeerState>(), Ok(PeerState::Closed));
        assert_eq!(
            "gone".parse::<PeerState>(),
            Err(DomainError::InvalidPeerState("gone".to_string()))
        );
    }

    #[test]
    fn test_join_is_idempotent_and_resets_terminal_state() {
        // テスト項目: 同じピアの再参加は既存レコードを返し、終了状態なら New に戻る
        // given (前提条件):
        let mut room = PeerRoom::new(meeting(), Timestamp::new(0));
        let alice = profile("alice");
        room.join(&alice, 10, Timestamp::new(1_000)).unwrap();
        room.update_state(&alice.id, PeerState::Failed, Timestamp::new(2_000))
            .unwrap();

        // when (操作):
        let record = room.join(&alice, 10, Timestamp::new(3_000)).unwrap();

        // then (期待する結果):
        assert_eq!(room.peer_count(), 1);
        assert_eq!(record.state, PeerState::New);
        assert_eq!(record.joined_at, Timestamp::new(1_000));
        assert_eq!(record.last_seen, Timestamp::new(3_000));
    }

    #[test]
    fn test_join_rejects_when_room_is_full() {
        // テスト項目: 上限に達したルームへの新規参加は RoomFull になる
        // given (前提条件):
        let mut room = PeerRoom::new(meeting(), Timestamp::new(0));
        room.join(&profile("a"), 2, Timestamp::new(0)).unwrap();
        room.join(&profile("b"), 2, Timestamp::new(0)).unwrap();

        // when (操作):
        let result = room.join(&profile("c"), 2, Timestamp::new(0));

        // then (期待する結果):
        assert_eq!(
            result,
            Err(PeerStoreError::RoomFull {
                meeting_id: "m-1".to_string(),
                max: 2
            })
        );
        // 既存ピアの再参加は上限に関係なく成功する
        assert!(room.join(&profile("a"), 2, Timestamp::new(0)).is_ok());
    }

    #[test]
    fn test_update_state_of_unknown_peer_fails() {
        // テスト項目: 存在しないピアの状態更新は PeerNotFound になる
        // given (前提条件):
        let mut room = PeerRoom::new(meeting(), Timestamp::new(0));
        let ghost = ClientId::new("ghost".to_string()).unwrap();

        // when (操作):
        let result = room.update_state(&ghost, PeerState::Connected, Timestamp::new(1));

        // then (期待する結果):
        assert!(matches!(result, Err(PeerStoreError::PeerNotFound { .. })));
    }

    #[test]
    fn test_sweep_evicts_only_idle_peers() {
        // テスト項目: last_seen が閾値を超えたピアだけが追い出される
        // given (前提条件):
        let policy = SweepPolicy::default();
        let mut room = PeerRoom::new(meeting(), Timestamp::new(0));
        let idle = profile("idle");
        let alive = profile("alive");
        room.join(&idle, 10, Timestamp::new(0)).unwrap();
        room.join(&alive, 10, Timestamp::new(0)).unwrap();
        room.touch(&alive.id, Timestamp::new(9 * MINUTE)).unwrap();

        // when (操作):
        let sweep = room.sweep(Timestamp::new(11 * MINUTE), &policy);

        // then (期待する結果):
        assert_eq!(sweep.evicted.len(), 1);
        assert_eq!(sweep.evicted[0].id, idle.id);
        assert!(!sweep.remove_room);
        assert!(room.peers.contains_key(&alive.id));
    }

    #[test]
    fn test_sweep_removes_empty_room_after_timeout() {
        // テスト項目: 空のルームは empty_room_timeout を過ぎてから削除される
        // given (前提条件):
        let policy = SweepPolicy::default();
        let mut room = PeerRoom::new(meeting(), Timestamp::new(0));
        let alice = profile("alice");
        room.join(&alice, 10, Timestamp::new(0)).unwrap();
        room.leave(&alice.id, Timestamp::new(MINUTE));

        // when (操作):
        let early = room.sweep(Timestamp::new(3 * MINUTE), &policy);
        let late = room.sweep(Timestamp::new(4 * MINUTE + 1), &policy);

        // then (期待する結果):
        assert!(!early.remove_room);
        assert!(late.remove_room);
        assert!(late.evicted.is_empty());
    }

    #[test]
    fn test_global_stats_counts_states() {
        // テスト項目: 全体統計がルーム数・ピア数・状態ごとの数を集計する
        // given (前提条件):
        let mut active = PeerRoom::new(meeting(), Timestamp::new(0));
        active.join(&profile("a"), 10, Timestamp::new(0)).unwrap();
        let b = profile("b");
        active.join(&b, 10, Timestamp::new(0)).unwrap();
        active
            .update_state(&b.id, PeerState::Connected, Timestamp::new(1))
            .unwrap();
        let empty = PeerRoom::new(MeetingId::new("m-2".to_string()).unwrap(), Timestamp::new(0));

        // when (操作):
        let stats = GlobalStats::collect(&[active, empty], StoreBackend::Memory);

        // then (期待する結果):
        assert_eq!(stats.rooms_total, 2);
        assert_eq!(stats.rooms_active, 1);
        assert_eq!(stats.rooms_empty, 1);
        assert_eq!(stats.peers_total, 2);
        assert_eq!(stats.average_peers_per_room, 2.0);
        assert_eq!(stats.state_counts.get(&PeerState::New), Some(&1));
        assert_eq!(stats.state_counts.get(&PeerState::Connected), Some(&1));
    }
}
