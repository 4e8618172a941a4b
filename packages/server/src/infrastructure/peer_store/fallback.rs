//! Fallback Peer Store
//!
//! 永続バックエンドが正常な間はそちらを使い、バックエンド自体の障害
//! （`Unavailable` / `Backend`）を検知した時点でインメモリ実装に切り替えます。
//!
//! - ロック競合（`Busy`）は障害ではないので、少し待って再試行する。再試行しても
//!   取れなければ、その操作だけ `Busy` を返す
//! - 切り替えの前に、永続バックエンドから読めるだけのルームをインメモリ側に写す。
//!   切り替え前に参加したピアの状態更新が `PeerNotFound` にならないようにするため
//! - 切り替えは 1 度だけログに出し、以降の操作は失敗させない

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use crate::domain::{
    ClientId, ClientProfile, MeetingId, PeerRecord, PeerRoom, PeerState, PeerStore,
    PeerStoreError, StoreBackend, SweepPolicy, SweepReport, Timestamp,
};

use super::InMemoryPeerStore;

/// `Busy` を受けたときの再試行回数
const BUSY_RETRIES: u32 = 3;
/// 再試行の間隔（回数に比例して伸ばす）
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

type StoreResult<T> = Result<T, PeerStoreError>;

pub struct FallbackPeerStore {
    primary: Arc<dyn PeerStore>,
    fallback: InMemoryPeerStore,
    degraded: AtomicBool,
    switching: Mutex<()>,
}

impl FallbackPeerStore {
    pub fn new(primary: Arc<dyn PeerStore>) -> Self {
        Self {
            primary,
            fallback: InMemoryPeerStore::new(),
            degraded: AtomicBool::new(false),
            switching: Mutex::new(()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// 永続バックエンドで実行する
    ///
    /// 切り替え済み、または今回の障害で切り替えた場合は `None` を返し、
    /// 呼び出し側はインメモリ側で実行する。
    async fn on_primary<'a, T>(
        &'a self,
        op: impl Fn() -> BoxFuture<'a, StoreResult<T>> + Send + 'a,
    ) -> Option<StoreResult<T>> {
        let mut attempt = 0;
        while !self.is_degraded() {
            match op().await {
                Err(err) if err.is_retryable() && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %err, "Peer store busy, retrying");
                    tokio::time::sleep(BUSY_BACKOFF * attempt).await;
                }
                Err(err) if err.is_backend_failure() => self.degrade(&err).await,
                result => return Some(result),
            }
        }
        None
    }

    async fn degrade(&self, err: &PeerStoreError) {
        let _switching = self.switching.lock().await;
        if self.is_degraded() {
            return;
        }
        let restored = match self.primary.rooms().await {
            Ok(rooms) => self.fallback.restore(rooms).await,
            Err(snapshot_err) => {
                tracing::warn!(error = %snapshot_err, "Could not read peer rooms before switching");
                0
            }
        };
        self.degraded.store(true, Ordering::Release);
        tracing::warn!(
            primary = self.primary.backend().as_str(),
            error = %err,
            restored_rooms = restored,
            "Peer store backend failed, switching to in-memory store"
        );
    }
}

#[async_trait]
impl PeerStore for FallbackPeerStore {
    fn backend(&self) -> StoreBackend {
        if self.is_degraded() {
            self.fallback.backend()
        } else {
            self.primary.backend()
        }
    }

    async fn join(
        &self,
        meeting_id: &MeetingId,
        profile: &ClientProfile,
        max_peers: usize,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError> {
        let primary = || self.primary.join(meeting_id, profile, max_peers, now);
        match self.on_primary(primary).await {
            Some(result) => result,
            None => self.fallback.join(meeting_id, profile, max_peers, now).await,
        }
    }

    async fn leave(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        now: Timestamp,
    ) -> Result<Option<PeerRecord>, PeerStoreError> {
        let primary = || self.primary.leave(meeting_id, peer_id, now);
        match self.on_primary(primary).await {
            Some(result) => result,
            None => self.fallback.leave(meeting_id, peer_id, now).await,
        }
    }

    async fn update_state(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        state: PeerState,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError> {
        let primary = || self.primary.update_state(meeting_id, peer_id, state, now);
        match self.on_primary(primary).await {
            Some(result) => result,
            None => {
                self.fallback
                    .update_state(meeting_id, peer_id, state, now)
                    .await
            }
        }
    }

    async fn touch(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        now: Timestamp,
    ) -> Result<(), PeerStoreError> {
        let primary = || self.primary.touch(meeting_id, peer_id, now);
        match self.on_primary(primary).await {
            Some(result) => result,
            None => self.fallback.touch(meeting_id, peer_id, now).await,
        }
    }

    async fn get(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
    ) -> Result<PeerRecord, PeerStoreError> {
        let primary = || self.primary.get(meeting_id, peer_id);
        match self.on_primary(primary).await {
            Some(result) => result,
            None => self.fallback.get(meeting_id, peer_id).await,
        }
    }

    async fn list_peers(&self, meeting_id: &MeetingId) -> Result<Vec<PeerRecord>, PeerStoreError> {
        let primary = || self.primary.list_peers(meeting_id);
        match self.on_primary(primary).await {
            Some(result) => result,
            None => self.fallback.list_peers(meeting_id).await,
        }
    }

    async fn room(&self, meeting_id: &MeetingId) -> Result<Option<PeerRoom>, PeerStoreError> {
        let primary = || self.primary.room(meeting_id);
        match self.on_primary(primary).await {
            Some(result) => result,
            None => self.fallback.room(meeting_id).await,
        }
    }

    async fn rooms(&self) -> Result<Vec<PeerRoom>, PeerStoreError> {
        let primary = || self.primary.rooms();
        match self.on_primary(primary).await {
            Some(result) => result,
            None => self.fallback.rooms().await,
        }
    }

    async fn sweep(
        &self,
        now: Timestamp,
        policy: &SweepPolicy,
    ) -> Result<SweepReport, PeerStoreError> {
        let primary = || self.primary.sweep(now, policy);
        match self.on_primary(primary).await {
            Some(result) => result,
            None => self.fallback.sweep(now, policy).await,
        }
    }
}
