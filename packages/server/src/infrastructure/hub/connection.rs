//! Connection: a registered signaling connection, owned by the hub.

use tokio::sync::mpsc::error::TrySendError;

use crate::domain::{
    ClientId, ClientProfile, ClientSummary, ConnectionToken, MeetingId, OutboundFrame,
    OutboundSender, SendError, Timestamp,
};

/// 登録済みの接続
///
/// トランスポート（WebSocket）自体はセッションが所有し、ハブは送信キューの
/// 送信側だけを保持します。送信側を drop するとライターポンプが終了し、
/// WebSocket が閉じられます。
#[derive(Debug)]
pub struct Connection {
    pub profile: ClientProfile,
    pub meeting_id: MeetingId,
    pub token: ConnectionToken,
    pub connected_at: Timestamp,
    outbound: OutboundSender,
}

impl Connection {
    pub fn new(
        profile: ClientProfile,
        meeting_id: MeetingId,
        token: ConnectionToken,
        connected_at: Timestamp,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            profile,
            meeting_id,
            token,
            connected_at,
            outbound,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.profile.id
    }

    /// 送信キューにノンブロッキングで積む
    pub fn try_push(&self, frame: OutboundFrame) -> Result<(), SendError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => SendError::QueueFull(self.id().to_string()),
            TrySendError::Closed(_) => SendError::Closed(self.id().to_string()),
        })
    }

    pub fn summary(&self) -> ClientSummary {
        ClientSummary {
            id: self.profile.id.clone(),
            meeting_id: self.meeting_id.clone(),
            name: self.profile.display_name.as_str().to_string(),
            is_authenticated: self.profile.is_authenticated(),
            user_id: self.profile.identity.user_id(),
            public_user_id: self.profile.identity.public_user_id(),
            connected_at: self.connected_at,
        }
    }
}
