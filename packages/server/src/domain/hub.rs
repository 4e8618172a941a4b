//! Signaling hub インターフェース
//!
//! ルームと接続の状態はハブのイベントループだけが変更します。
//! 外部（UseCase / UI 層）はこの trait を通じてイベントを送るだけです。

use std::{fmt, sync::Arc};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    ClientId, ClientProfile, ConnectionToken, HubError, MeetingId, SignalingMessage, Timestamp,
};

/// Encoded frame queued for one connection.
pub type OutboundFrame = Arc<str>;

/// Sending half of a connection's bounded outbound queue.
pub type OutboundSender = mpsc::Sender<OutboundFrame>;

/// Why a connection leaves the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The client sent `leave`.
    Left,
    /// The transport closed or failed.
    Disconnected,
    /// The peer-state sweep found the peer idle.
    Evicted,
    /// The outbound queue was full or closed.
    Backpressure,
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Left => "left",
            Self::Disconnected => "disconnected",
            Self::Evicted => "evicted",
            Self::Backpressure => "backpressure",
        };
        f.write_str(reason)
    }
}

/// Result of [`SignalingHub::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// The connection was live and has been removed.
    Removed,
    /// Nothing is registered under the id any more (already unregistered or
    /// dropped for backpressure).
    AlreadyGone,
    /// A newer connection holds the id; it was left untouched.
    Replaced,
}

impl UnregisterOutcome {
    /// 同じ ID の新しい接続が残っていないか
    ///
    /// `false` の間は、ID に紐づく永続状態（ピア状態など）を片付けてはならない。
    pub fn releases_identity(self) -> bool {
        !matches!(self, Self::Replaced)
    }
}

/// Snapshot of a registered connection for collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSummary {
    pub id: ClientId,
    pub meeting_id: MeetingId,
    pub name: String,
    pub is_authenticated: bool,
    pub user_id: Option<Uuid>,
    pub public_user_id: Option<Uuid>,
    pub connected_at: Timestamp,
}

/// Signaling hub
///
/// 実装は `HubHandle`（アクターへのハンドル）。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SignalingHub: Send + Sync {
    /// 接続を登録する。同じ ID の接続があれば置き換える。
    ///
    /// 戻り値のトークンは、以降の `submit` / `unregister` で使用する。
    async fn register(
        &self,
        meeting_id: MeetingId,
        profile: ClientProfile,
        outbound: OutboundSender,
    ) -> Result<ConnectionToken, HubError>;

    /// 接続を登録解除する。未登録、またはトークンが一致しなければ何もしない。
    ///
    /// 取り除いたのか、既にいなかったのか、新しい接続に置き換わっていたのかを返す。
    async fn unregister(
        &self,
        client_id: ClientId,
        token: Option<ConnectionToken>,
        reason: LeaveReason,
    ) -> Result<UnregisterOutcome, HubError>;

    /// クライアントから受信したメッセージをハブに渡す
    async fn submit(
        &self,
        token: ConnectionToken,
        message: SignalingMessage,
    ) -> Result<(), HubError>;

    /// ルームの全員に送信する（送信者の除外なし）
    async fn broadcast_to_meeting(
        &self,
        meeting_id: MeetingId,
        message: SignalingMessage,
    ) -> Result<(), HubError>;

    /// 1 クライアントに送信する。`HubError::Send` で `NotFound` / `QueueFull` を返す
    async fn send_to_client(
        &self,
        client_id: ClientId,
        message: SignalingMessage,
    ) -> Result<(), HubError>;

    async fn participants(&self, meeting_id: MeetingId) -> Result<Vec<ClientSummary>, HubError>;

    async fn participant_count(&self, meeting_id: MeetingId) -> Result<usize, HubError>;

    async fn is_meeting_active(&self, meeting_id: MeetingId) -> Result<bool, HubError>;

    /// スイープで追い出されたピアを処理する
    ///
    /// まだ登録されていれば登録解除し、そうでなければ `participant-left`
    /// だけをルームに通知する。
    async fn evict_peer(&self, meeting_id: MeetingId, client_id: ClientId)
    -> Result<(), HubError>;
}
