//! Server configuration.
//!
//! すべての設定はコマンドライン引数で与え、同名の `KAIGI_*` 環境変数でも
//! 指定できます。時間に関する値はすべて調整用のデフォルト値です。

use std::{collections::HashMap, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Identity, ResolvedIdentity, SweepPolicy};

/// Peer-State の保存先
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PeerStoreKind {
    /// プロセス内のメモリ
    Memory,
    /// SQLite（使えなくなったらメモリに切り替える）
    Sqlite,
}

/// 設定の検証エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("ping interval ({ping_secs}s) must be shorter than pong wait ({pong_secs}s)")]
    PingNotShorterThanPongWait { ping_secs: u64, pong_secs: u64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// `--bearer-token` で与える固定のトークン
///
/// 形式: `<token>=user:<uuid>[:<name>]` または `<token>=public:<uuid>[:<name>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerGrant {
    pub token: String,
    pub identity: ResolvedIdentity,
}

fn parse_bearer_grant(raw: &str) -> Result<BearerGrant, String> {
    let (token, grant) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <token>=<kind>:<uuid>[:<name>], got '{}'", raw))?;
    if token.is_empty() {
        return Err("bearer token must not be empty".to_string());
    }
    let mut parts = grant.splitn(3, ':');
    let kind = parts.next().unwrap_or_default();
    let id = parts
        .next()
        .ok_or_else(|| format!("missing uuid in '{}'", grant))
        .and_then(|id| Uuid::parse_str(id).map_err(|e| format!("invalid uuid '{}': {}", id, e)))?;
    let identity = match kind {
        "user" => Identity::User(id),
        "public" => Identity::Public(id),
        other => return Err(format!("unknown identity kind '{}'", other)),
    };
    Ok(BearerGrant {
        token: token.to_string(),
        identity: ResolvedIdentity {
            identity,
            display_name: parts.next().map(str::to_string),
        },
    })
}

#[derive(Parser, Debug, Clone)]
#[command(name = "kaigi-server")]
#[command(about = "WebRTC signaling and room coordination server", long_about = None)]
pub struct ServerConfig {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "KAIGI_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "KAIGI_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Default log level (overridden by RUST_LOG)
    #[arg(long, env = "KAIGI_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Capacity of each connection's outbound queue
    #[arg(long, env = "KAIGI_OUTBOUND_CAPACITY", default_value_t = 256)]
    pub outbound_capacity: usize,

    /// Capacity of each hub event channel
    #[arg(long, env = "KAIGI_HUB_CHANNEL_CAPACITY", default_value_t = 1024)]
    pub hub_channel_capacity: usize,

    /// Read deadline: a connection silent for this long is closed
    #[arg(long, env = "KAIGI_PONG_WAIT_SECS", default_value_t = 60)]
    pub pong_wait_secs: u64,

    /// Interval between keepalive pings (must be shorter than pong wait)
    #[arg(long, env = "KAIGI_PING_INTERVAL_SECS", default_value_t = 54)]
    pub ping_interval_secs: u64,

    /// Deadline for a single frame write
    #[arg(long, env = "KAIGI_WRITE_WAIT_SECS", default_value_t = 10)]
    pub write_wait_secs: u64,

    /// Interval between peer-state eviction sweeps
    #[arg(long, env = "KAIGI_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Peers idle longer than this are evicted
    #[arg(long, env = "KAIGI_INACTIVITY_THRESHOLD_SECS", default_value_t = 600)]
    pub inactivity_threshold_secs: u64,

    /// Empty peer rooms older than this are removed
    #[arg(long, env = "KAIGI_EMPTY_ROOM_TIMEOUT_SECS", default_value_t = 180)]
    pub empty_room_timeout_secs: u64,

    /// Maximum number of peers per meeting
    #[arg(long, env = "KAIGI_MAX_PEERS_PER_ROOM", default_value_t = 50)]
    pub max_peers_per_room: usize,

    /// Peer-state storage backend
    #[arg(long, env = "KAIGI_PEER_STORE", value_enum, default_value_t = PeerStoreKind::Memory)]
    pub peer_store: PeerStoreKind,

    /// SQLite database file used by the sqlite peer store
    #[arg(long, env = "KAIGI_SQLITE_PATH", default_value = "kaigi-peers.db")]
    pub sqlite_path: PathBuf,

    /// Accept any meeting id
    #[arg(long, env = "KAIGI_OPEN_MEETINGS")]
    pub open_meetings: bool,

    /// Meeting ids accepted when meetings are not open
    #[arg(long = "meeting", env = "KAIGI_MEETINGS", value_delimiter = ',')]
    pub meetings: Vec<String>,

    /// Trust the userId/publicUserId query parameters (development only)
    #[arg(long, env = "KAIGI_TRUST_IDENTITY_HINTS")]
    pub trust_identity_hints: bool,

    /// Static bearer tokens: <token>=user:<uuid>[:<name>] or <token>=public:<uuid>[:<name>]
    #[arg(
        long = "bearer-token",
        env = "KAIGI_BEARER_TOKENS",
        value_delimiter = ',',
        value_parser = parse_bearer_grant
    )]
    pub bearer_tokens: Vec<BearerGrant>,
}

impl ServerConfig {
    /// 設定値の整合性を検証する
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_secs >= self.pong_wait_secs {
            return Err(ConfigError::PingNotShorterThanPongWait {
                ping_secs: self.ping_interval_secs,
                pong_secs: self.pong_wait_secs,
            });
        }
        let non_zero = [
            ("outbound capacity", self.outbound_capacity as u64),
            ("hub channel capacity", self.hub_channel_capacity as u64),
            ("max peers per room", self.max_peers_per_room as u64),
            ("ping interval", self.ping_interval_secs),
            ("write wait", self.write_wait_secs),
            ("sweep interval", self.sweep_interval_secs),
        ];
        if let Some(&(name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(name));
        }
        Ok(())
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            inactivity_threshold: Duration::from_secs(self.inactivity_threshold_secs),
            empty_room_timeout: Duration::from_secs(self.empty_room_timeout_secs),
        }
    }

    /// ベアラートークン → 本人の対応表
    pub fn bearer_token_map(&self) -> HashMap<String, ResolvedIdentity> {
        self.bearer_tokens
            .iter()
            .map(|grant| (grant.token.clone(), grant.identity.clone()))
            .collect()
    }
}
