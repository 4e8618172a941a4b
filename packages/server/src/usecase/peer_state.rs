//! UseCase: Peer-State（WebRTC レベルのピア状態）
//!
//! ソケットのライフサイクルとは独立に、ピアの接続状態とメタデータを管理します。
//! 保存先（インメモリ / SQLite）は `PeerStore` trait の裏に隠れており、
//! このサービスはどちらが動いているかを意識しません。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - 参加・退出・状態更新・一覧取得の基本操作
//! - offer / answer / ICE による `new` → `connecting` の遷移
//! - 統計情報（ルーム単位・全体）の集計
//! - スイープのポリシー適用
//!
//! ### どのような状況を想定しているか
//! - 正常系：参加から退出までの一連の操作
//! - エッジケース：既に `connecting` 以降のピアへのネゴシエーション通知（状態は変えない）
//! - 異常系：存在しないピアの取得、定員超過

use std::sync::Arc;

use kaigi_shared::time::Clock;

use crate::domain::{
    ClientId, ClientProfile, GlobalStats, MeetingId, PeerRecord, PeerState, PeerStore,
    PeerStoreError, RoomStats, SweepPolicy, SweepReport, Timestamp,
};

/// Peer-State サービス
pub struct PeerStateService {
    /// PeerStore（保存先の抽象化）
    store: Arc<dyn PeerStore>,
    /// Clock（時刻の抽象化）
    clock: Arc<dyn Clock>,
    /// 1 ルームあたりの最大ピア数
    max_peers_per_room: usize,
}

impl PeerStateService {
    /// 新しい PeerStateService を作成
    pub fn new(store: Arc<dyn PeerStore>, clock: Arc<dyn Clock>, max_peers_per_room: usize) -> Self {
        Self {
            store,
            clock,
            max_peers_per_room,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// ピアを参加させる
    ///
    /// 既に参加済みなら既存のレコードを返します。
    ///
    /// # Returns
    ///
    /// * `Err(PeerStoreError::RoomFull)` - ルームが定員に達している
    pub async fn join(
        &self,
        meeting_id: &MeetingId,
        profile: &ClientProfile,
    ) -> Result<PeerRecord, PeerStoreError> {
        self.store
            .join(meeting_id, profile, self.max_peers_per_room, self.now())
            .await
    }

    /// ピアを退出させる。参加していなければ `Ok(None)`
    pub async fn leave(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
    ) -> Result<Option<PeerRecord>, PeerStoreError> {
        self.store.leave(meeting_id, peer_id, self.now()).await
    }

    /// クライアントが報告した状態に更新する
    pub async fn update_state(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        state: PeerState,
    ) -> Result<PeerRecord, PeerStoreError> {
        let record = self
            .store
            .update_state(meeting_id, peer_id, state, self.now())
            .await?;
        tracing::debug!(
            meeting_id = %meeting_id,
            peer_id = %peer_id,
            state = %state,
            "Peer state updated"
        );
        Ok(record)
    }

    /// offer / answer / ICE の送信を記録する
    ///
    /// `new` のピアだけを `connecting` に進めます。それ以外の状態は変えず、
    /// `last_seen` だけを更新します。
    pub async fn note_negotiation(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
    ) -> Result<(), PeerStoreError> {
        let current = self.store.get(meeting_id, peer_id).await?;
        if current.state == PeerState::New {
            self.update_state(meeting_id, peer_id, PeerState::Connecting)
                .await?;
        } else {
            self.touch(meeting_id, peer_id).await?;
        }
        Ok(())
    }

    /// 生存確認を記録する
    pub async fn touch(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
    ) -> Result<(), PeerStoreError> {
        self.store.touch(meeting_id, peer_id, self.now()).await
    }

    pub async fn get(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
    ) -> Result<PeerRecord, PeerStoreError> {
        self.store.get(meeting_id, peer_id).await
    }

    pub async fn list_peers(&self, meeting_id: &MeetingId) -> Result<Vec<PeerRecord>, PeerStoreError> {
        self.store.list_peers(meeting_id).await
    }

    /// ルーム単位の統計。ルームがなければ `None`
    pub async fn room_stats(&self, meeting_id: &MeetingId) -> Result<Option<RoomStats>, PeerStoreError> {
        Ok(self.store.room(meeting_id).await?.map(|room| room.stats()))
    }

    /// 全ルームの統計
    pub async fn global_stats(&self) -> Result<GlobalStats, PeerStoreError> {
        let rooms = self.store.rooms().await?;
        Ok(GlobalStats::collect(&rooms, self.store.backend()))
    }

    /// アイドルなピアと期限切れのルームを削除する
    pub async fn sweep(&self, policy: &SweepPolicy) -> Result<SweepReport, PeerStoreError> {
        self.store.sweep(self.now(), policy).await
    }
}
