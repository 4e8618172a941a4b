//! 外部コラボレーターの trait 定義
//!
//! ドメイン層が必要とするインターフェースをドメイン層自身が定義し、
//! Infrastructure 層が具体的な実装を提供します（依存性の逆転）。
//!
//! - `MeetingDirectory`: 会議の存在確認
//! - `ParticipantRepository`: 参加者のアクティブ状態の永続化
//! - `IdentityResolver`: リクエストからの本人確認
//! - `PeerStore`: Peer-State の保存先（インメモリ / SQLite）

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::{
    ClientId, ClientProfile, Identity, IdentityHints, MeetingId, PeerRecord, PeerRoom, PeerState,
    PeerStoreError, PersistenceError, ResolvedIdentity, StoreBackend, SweepPolicy, SweepReport,
    Timestamp,
};

/// Meeting existence check
///
/// 存在しない会議への接続は WebSocket のアップグレード前に拒否されます。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MeetingDirectory: Send + Sync {
    async fn meeting_exists(&self, meeting_id: &MeetingId) -> Result<bool, PersistenceError>;
}

/// Participant persistence
///
/// 実装はトランザクション境界を自分で持つこと。呼び出し側にとっては
/// ベストエフォートで、失敗してもライブのルーム操作は止めません。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// 参加者をアクティブ / 非アクティブにする
    async fn set_participant_active(
        &self,
        meeting_id: &MeetingId,
        identity: &Identity,
        active: bool,
    ) -> Result<(), PersistenceError>;
}

/// Identity/session resolution
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// 解決できない場合は匿名として返す（エラーにはしない）
    async fn resolve(&self, hints: &IdentityHints) -> ResolvedIdentity;
}

/// Peer-State storage
///
/// 永続バックエンドとインメモリ実装は同じ意味論を持ちます。
/// `PeerStateService` はどちらが動いているかを意識しません。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// 現在使用中のバックエンド
    fn backend(&self) -> StoreBackend;

    /// ピアを参加させる（冪等。既存なら既存のレコードを返す）
    async fn join(
        &self,
        meeting_id: &MeetingId,
        profile: &ClientProfile,
        max_peers: usize,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError>;

    /// ピアを退出させる。空になったルームはスイープまで残す
    async fn leave(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        now: Timestamp,
    ) -> Result<Option<PeerRecord>, PeerStoreError>;

    async fn update_state(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        state: PeerState,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError>;

    /// `last_seen` を更新する
    async fn touch(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        now: Timestamp,
    ) -> Result<(), PeerStoreError>;

    async fn get(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
    ) -> Result<PeerRecord, PeerStoreError>;

    async fn list_peers(&self, meeting_id: &MeetingId) -> Result<Vec<PeerRecord>, PeerStoreError>;

    async fn room(&self, meeting_id: &MeetingId) -> Result<Option<PeerRoom>, PeerStoreError>;

    async fn rooms(&self) -> Result<Vec<PeerRoom>, PeerStoreError>;

    /// アイドルなピアと期限切れのルームを削除する
    async fn sweep(
        &self,
        now: Timestamp,
        policy: &SweepPolicy,
    ) -> Result<SweepReport, PeerStoreError>;
}
