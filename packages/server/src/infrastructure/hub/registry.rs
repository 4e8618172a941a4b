//! Connection Registry
//!
//! ハブのイベントループだけが所有・変更します（ロック不要）。

use std::collections::HashMap;

use crate::domain::{ClientId, ConnectionToken, OutboundFrame, SendError};

use super::connection::Connection;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ClientId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登録する。同じ ID の接続があれば置き換え、古い接続を返す
    ///
    /// 返された古い接続を drop すると、その送信キューが閉じられます。
    pub fn register(&mut self, connection: Connection) -> Option<Connection> {
        self.connections.insert(connection.id().clone(), connection)
    }

    /// 登録を解除する
    ///
    /// 未登録なら何もしない（切断時の競合で二重に呼ばれ得る）。`token` を
    /// 指定した場合は、現在の接続のトークンと一致するときだけ解除する。
    pub fn unregister(
        &mut self,
        client_id: &ClientId,
        token: Option<ConnectionToken>,
    ) -> Option<Connection> {
        let current = self.connections.get(client_id)?;
        if token.is_some_and(|token| token != current.token) {
            return None;
        }
        self.connections.remove(client_id)
    }

    pub fn lookup(&self, client_id: &ClientId) -> Option<&Connection> {
        self.connections.get(client_id)
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.connections.contains_key(client_id)
    }

    /// ノンブロッキングで送信する
    ///
    /// キューが満杯、または閉じていた場合、その接続は死んでいるとみなして
    /// レジストリから取り除く。取り除いた接続の後始末（ルームからの削除と
    /// 通知）は呼び出し側が行う。
    pub fn send_to(&mut self, client_id: &ClientId, frame: OutboundFrame) -> Result<(), SendError> {
        let connection = self
            .connections
            .get(client_id)
            .ok_or_else(|| SendError::NotFound(client_id.to_string()))?;
        let result = connection.try_push(frame);
        if result.is_err() {
            self.connections.remove(client_id);
        }
        result
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::{ClientProfile, DisplayName, Identity, MeetingId, Timestamp};

    fn connection(
        id: &str,
        token: u64,
        capacity: usize,
    ) -> (Connection, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let profile = ClientProfile {
            id: ClientId::new(id.to_string()).unwrap(),
            identity: Identity::Anonymous,
            display_name: DisplayName::new(id.to_string()).unwrap(),
        };
        let connection = Connection::new(
            profile,
            MeetingId::new("m-1".to_string()).unwrap(),
            ConnectionToken::new(token),
            Timestamp::new(0),
            tx,
        );
        (connection, rx)
    }

    fn id(value: &str) -> ClientId {
        ClientId::new(value.to_string()).unwrap()
    }

    #[test]
    fn test_register_replaces_duplicate_id() {
        // テスト項目: 同じ ID の登録は置き換えになり、古い接続が返される
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let (first, _rx1) = connection("alice", 1, 4);
        let (second, _rx2) = connection("alice", 2, 4);
        registry.register(first);

        // when (操作):
        let replaced = registry.register(second);

        // then (期待する結果):
        assert_eq!(replaced.map(|c| c.token), Some(ConnectionToken::new(1)));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup(&id("alice")).map(|c| c.token),
            Some(ConnectionToken::new(2))
        );
    }

    #[test]
    fn test_unregister_is_idempotent_and_token_checked() {
        // テスト項目: 二重の登録解除はエラーにならず、古いトークンでは解除されない
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let (conn, _rx) = connection("alice", 2, 4);
        registry.register(conn);

        // when (操作):
        let stale = registry.unregister(&id("alice"), Some(ConnectionToken::new(1)));
        let first = registry.unregister(&id("alice"), Some(ConnectionToken::new(2)));
        let second = registry.unregister(&id("alice"), None);

        // then (期待する結果):
        assert!(stale.is_none());
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_send_to_removes_connection_with_full_queue() {
        // テスト項目: 送信キューが満杯の接続は QueueFull になり、レジストリから外される
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let (conn, _rx) = connection("slow", 1, 1);
        registry.register(conn);
        registry.send_to(&id("slow"), Arc::from("one")).unwrap();

        // when (操作):
        let result = registry.send_to(&id("slow"), Arc::from("two"));

        // then (期待する結果):
        assert_eq!(result, Err(SendError::QueueFull("slow".to_string())));
        assert!(!registry.contains(&id("slow")));
    }

    #[test]
    fn test_send_to_unknown_client() {
        // テスト項目: 未登録のクライアントへの送信は NotFound になる
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();

        // when (操作):
        let result = registry.send_to(&id("ghost"), Arc::from("hello"));

        // then (期待する結果):
        assert_eq!(result, Err(SendError::NotFound("ghost".to_string())));
    }
}
