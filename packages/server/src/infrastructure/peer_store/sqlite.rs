//! SQLite Peer Store 実装
//!
//! 複数のサーバーインスタンスが同じデータベースファイルを共有できる永続バックエンドです。
//!
//! ## 整合性
//!
//! 変更系の操作はすべて `BEGIN IMMEDIATE` のトランザクション内で
//! 「ルームを読み込む → ドメインモデル（`PeerRoom`）で変更する → 書き戻す」
//! の順に行います。インメモリ実装と同じドメインロジックを通るため意味論が一致し、
//! 書き込みロックにより他インスタンスとの更新が混ざることはありません。
//!
//! 他インスタンスが書き込みロックを持っている間は `busy_timeout` の範囲で待ちます。
//! それでも取れなければ `PeerStoreError::Busy`（再試行可能）を返し、
//! バックエンドの障害（`Backend`）とは区別します。
//!
//! rusqlite はブロッキング API なので、呼び出しは `spawn_blocking` で行います。

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use uuid::Uuid;

use crate::domain::{
    ClientId, ClientProfile, MeetingId, PeerRecord, PeerRoom, PeerState, PeerStore,
    PeerStoreError, StoreBackend, SweepPolicy, SweepReport, Timestamp,
};

const SCHEMA: &str = include_str!("peer_store_schema.sql");

/// 書き込みロックを待つ時間の既定値
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite を使った Peer Store 実装
#[derive(Clone)]
pub struct SqlitePeerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePeerStore {
    /// データベースを開き（無ければ作成し）、スキーマを初期化する
    pub fn open(path: &Path) -> Result<Self, PeerStoreError> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// ロック待ちの上限を指定して開く
    pub fn open_with_busy_timeout(
        path: &Path,
        busy_timeout: Duration,
    ) -> Result<Self, PeerStoreError> {
        let conn = Connection::open(path).map_err(|e| {
            PeerStoreError::Unavailable(format!(
                "failed to open peer database {}: {e}",
                path.display()
            ))
        })?;
        Self::init(conn, busy_timeout)
    }

    /// テスト用のインメモリデータベース
    pub fn open_in_memory() -> Result<Self, PeerStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PeerStoreError::Unavailable(format!("failed to open peer database: {e}")))?;
        Self::init(conn, DEFAULT_BUSY_TIMEOUT)
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, PeerStoreError> {
        conn.busy_timeout(busy_timeout).map_err(|e| {
            PeerStoreError::Unavailable(format!("failed to configure peer database: {e}"))
        })?;
        conn.execute_batch(SCHEMA).map_err(|e| {
            PeerStoreError::Unavailable(format!("failed to initialize peer schema: {e}"))
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, PeerStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PeerStoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| PeerStoreError::Unavailable("peer database lock poisoned".into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| PeerStoreError::Backend(format!("peer database task failed: {e}")))?
    }

    /// 1 ルームを読み込み、変更して書き戻す
    ///
    /// `create_at` が `Some` の場合、ルームが無ければその時刻で作成する。`f` がエラーを返したら
    /// 何も書き込まない。
    async fn mutate_room<T, F>(
        &self,
        meeting_id: &MeetingId,
        create_at: Option<Timestamp>,
        f: F,
    ) -> Result<T, PeerStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PeerRoom) -> Result<T, PeerStoreError> + Send + 'static,
    {
        let meeting_id = meeting_id.clone();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(backend)?;
            let mut room = match (load_room(&tx, &meeting_id)?, create_at) {
                (Some(room), _) => room,
                (None, Some(now)) => PeerRoom::new(meeting_id.clone(), now),
                (None, None) => return Err(PeerStoreError::RoomNotFound(meeting_id.to_string())),
            };
            let output = f(&mut room)?;
            save_room(&tx, &room)?;
            tx.commit().map_err(backend)?;
            Ok(output)
        })
        .await
    }
}

fn backend(err: rusqlite::Error) -> PeerStoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            PeerStoreError::Busy(err.to_string())
        }
        _ => PeerStoreError::Backend(err.to_string()),
    }
}

fn corrupt(what: &str, value: &str) -> PeerStoreError {
    PeerStoreError::Backend(format!("corrupt {what} in peer database: {value}"))
}

fn parse_uuid(value: Option<String>) -> Result<Option<Uuid>, PeerStoreError> {
    value
        .map(|raw| Uuid::parse_str(&raw).map_err(|_| corrupt("uuid", &raw)))
        .transpose()
}

/// Raw `peers` row before validation.
struct PeerRow {
    peer_id: String,
    user_id: Option<String>,
    public_user_id: Option<String>,
    name: String,
    is_authenticated: bool,
    state: String,
    joined_at: i64,
    last_seen: i64,
}

impl PeerRow {
    fn into_record(self, meeting_id: &MeetingId) -> Result<PeerRecord, PeerStoreError> {
        Ok(PeerRecord {
            id: ClientId::new(self.peer_id.clone())
                .map_err(|_| corrupt("peer id", &self.peer_id))?,
            meeting_id: meeting_id.clone(),
            user_id: parse_uuid(self.user_id)?,
            public_user_id: parse_uuid(self.public_user_id)?,
            name: self.name,
            is_authenticated: self.is_authenticated,
            state: self
                .state
                .parse::<PeerState>()
                .map_err(|_| corrupt("peer state", &self.state))?,
            joined_at: Timestamp::new(self.joined_at),
            last_seen: Timestamp::new(self.last_seen),
        })
    }
}

fn load_room(conn: &Connection, meeting_id: &MeetingId) -> Result<Option<PeerRoom>, PeerStoreError> {
    let header = conn
        .query_row(
            "SELECT created_at, last_activity FROM peer_rooms WHERE meeting_id = ?",
            params![meeting_id.as_str()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()
        .map_err(backend)?;
    let Some((created_at, last_activity)) = header else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT peer_id, user_id, public_user_id, name, is_authenticated, state,
                    joined_at, last_seen
             FROM peers
             WHERE meeting_id = ?",
        )
        .map_err(backend)?;
    let rows = stmt
        .query_map(params![meeting_id.as_str()], |row| {
            Ok(PeerRow {
                peer_id: row.get(0)?,
                user_id: row.get(1)?,
                public_user_id: row.get(2)?,
                name: row.get(3)?,
                is_authenticated: row.get(4)?,
                state: row.get(5)?,
                joined_at: row.get(6)?,
                last_seen: row.get(7)?,
            })
        })
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;

    let mut room = PeerRoom::new(meeting_id.clone(), Timestamp::new(created_at));
    room.last_activity = Timestamp::new(last_activity);
    for row in rows {
        let record = row.into_record(meeting_id)?;
        room.peers.insert(record.id.clone(), record);
    }
    Ok(Some(room))
}

fn load_all_rooms(conn: &Connection) -> Result<Vec<PeerRoom>, PeerStoreError> {
    let mut stmt = conn
        .prepare("SELECT meeting_id FROM peer_rooms ORDER BY meeting_id")
        .map_err(backend)?;
    let ids: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;

    let mut rooms = Vec::with_capacity(ids.len());
    for id in ids {
        let meeting_id = MeetingId::new(id.clone()).map_err(|_| corrupt("meeting id", &id))?;
        if let Some(room) = load_room(conn, &meeting_id)? {
            rooms.push(room);
        }
    }
    Ok(rooms)
}

fn save_room(conn: &Connection, room: &PeerRoom) -> Result<(), PeerStoreError> {
    conn.execute(
        "INSERT INTO peer_rooms (meeting_id, created_at, last_activity)
         VALUES (?, ?, ?)
         ON CONFLICT(meeting_id) DO UPDATE SET
            last_activity = excluded.last_activity",
        params![
            room.meeting_id.as_str(),
            room.created_at.value(),
            room.last_activity.value(),
        ],
    )
    .map_err(backend)?;

    conn.execute(
        "DELETE FROM peers WHERE meeting_id = ?",
        params![room.meeting_id.as_str()],
    )
    .map_err(backend)?;
    for peer in room.peers.values() {
        conn.execute(
            "INSERT INTO peers (
                meeting_id, peer_id, user_id, public_user_id, name,
                is_authenticated, state, joined_at, last_seen
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                room.meeting_id.as_str(),
                peer.id.as_str(),
                peer.user_id.map(|id| id.to_string()),
                peer.public_user_id.map(|id| id.to_string()),
                peer.name,
                peer.is_authenticated,
                peer.state.as_str(),
                peer.joined_at.value(),
                peer.last_seen.value(),
            ],
        )
        .map_err(backend)?;
    }
    Ok(())
}

fn delete_room(conn: &Connection, meeting_id: &MeetingId) -> Result<(), PeerStoreError> {
    conn.execute(
        "DELETE FROM peers WHERE meeting_id = ?",
        params![meeting_id.as_str()],
    )
    .map_err(backend)?;
    conn.execute(
        "DELETE FROM peer_rooms WHERE meeting_id = ?",
        params![meeting_id.as_str()],
    )
    .map_err(backend)?;
    Ok(())
}

#[async_trait]
impl PeerStore for SqlitePeerStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    async fn join(
        &self,
        meeting_id: &MeetingId,
        profile: &ClientProfile,
        max_peers: usize,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError> {
        let profile = profile.clone();
        self.mutate_room(meeting_id, Some(now), move |room| {
            room.join(&profile, max_peers, now)
        })
        .await
    }

    async fn leave(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        now: Timestamp,
    ) -> Result<Option<PeerRecord>, PeerStoreError> {
        let peer_id = peer_id.clone();
        let result = self
            .mutate_room(meeting_id, None, move |room| Ok(room.leave(&peer_id, now)))
            .await;
        match result {
            Err(PeerStoreError::RoomNotFound(_)) => Ok(None),
            other => other,
        }
    }

    async fn update_state(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        state: PeerState,
        now: Timestamp,
    ) -> Result<PeerRecord, PeerStoreError> {
        let peer_id = peer_id.clone();
        self.mutate_room(meeting_id, None, move |room| {
            room.update_state(&peer_id, state, now)
        })
        .await
    }

    async fn touch(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
        now: Timestamp,
    ) -> Result<(), PeerStoreError> {
        let peer_id = peer_id.clone();
        self.mutate_room(meeting_id, None, move |room| room.touch(&peer_id, now))
            .await
    }

    async fn get(
        &self,
        meeting_id: &MeetingId,
        peer_id: &ClientId,
    ) -> Result<PeerRecord, PeerStoreError> {
        let room = self
            .room(meeting_id)
            .await?
            .ok_or_else(|| PeerStoreError::RoomNotFound(meeting_id.to_string()))?;
        room.peers
            .get(peer_id)
            .cloned()
            .ok_or_else(|| PeerStoreError::PeerNotFound {
                meeting_id: meeting_id.to_string(),
                peer_id: peer_id.to_string(),
            })
    }

    async fn list_peers(&self, meeting_id: &MeetingId) -> Result<Vec<PeerRecord>, PeerStoreError> {
        Ok(self
            .room(meeting_id)
            .await?
            .map(|room| room.peers.into_values().collect())
            .unwrap_or_default())
    }

    async fn room(&self, meeting_id: &MeetingId) -> Result<Option<PeerRoom>, PeerStoreError> {
        let meeting_id = meeting_id.clone();
        self.with_conn(move |conn| load_room(conn, &meeting_id)).await
    }

    async fn rooms(&self) -> Result<Vec<PeerRoom>, PeerStoreError> {
        self.with_conn(|conn| load_all_rooms(conn)).await
    }

    async fn sweep(
        &self,
        now: Timestamp,
        policy: &SweepPolicy,
    ) -> Result<SweepReport, PeerStoreError> {
        let policy = *policy;
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(backend)?;
            let mut report = SweepReport::default();
            for mut room in load_all_rooms(&tx)? {
                let sweep = room.sweep(now, &policy);
                if sweep.remove_room {
                    delete_room(&tx, &room.meeting_id)?;
                    report.removed_rooms.push(room.meeting_id.clone());
                } else if !sweep.evicted.is_empty() {
                    save_room(&tx, &room)?;
                }
                report.evicted.extend(sweep.evicted);
            }
            tx.commit().map_err(backend)?;
            Ok(report)
        })
        .await
    }
}
