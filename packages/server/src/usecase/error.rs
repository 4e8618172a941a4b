//! UseCase 層のエラー型

use thiserror::Error;

use crate::domain::{DomainError, HubError, PersistenceError};

/// 参加者接続のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// 会議が存在しない
    #[error("meeting '{0}' not found")]
    MeetingNotFound(String),

    /// 会議の存在確認に失敗した
    #[error("meeting lookup failed: {0}")]
    MeetingLookup(#[source] PersistenceError),

    /// クライアント ID を導出できなかった
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[source] DomainError),

    /// ルームが定員に達している
    #[error("meeting '{meeting_id}' is full ({max} peers)")]
    RoomFull { meeting_id: String, max: usize },

    /// ハブが停止している
    #[error(transparent)]
    Hub(#[from] HubError),
}
