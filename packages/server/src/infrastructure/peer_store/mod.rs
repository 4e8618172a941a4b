//! Peer-State の保存先
//!
//! - `inmemory`: プロセス内の HashMap
//! - `sqlite`: 複数インスタンスで共有できる SQLite
//! - `fallback`: SQLite が使えなくなったらインメモリに切り替えるラッパー

pub mod fallback;
pub mod inmemory;
pub mod sqlite;

use std::{path::Path, sync::Arc};

pub use fallback::FallbackPeerStore;
pub use inmemory::InMemoryPeerStore;
pub use sqlite::SqlitePeerStore;

use crate::{config::PeerStoreKind, domain::PeerStore};

/// 設定に従って Peer Store を用意する
///
/// SQLite を開けなかった場合も起動は止めず、インメモリで動かす。
pub fn open_peer_store(kind: PeerStoreKind, sqlite_path: &Path) -> Arc<dyn PeerStore> {
    match kind {
        PeerStoreKind::Memory => Arc::new(InMemoryPeerStore::new()),
        PeerStoreKind::Sqlite => match SqlitePeerStore::open(sqlite_path) {
            Ok(store) => {
                tracing::info!(path = %sqlite_path.display(), "Using SQLite peer store");
                Arc::new(FallbackPeerStore::new(Arc::new(store)))
            }
            Err(err) => {
                tracing::warn!(
                    path = %sqlite_path.display(),
                    error = %err,
                    "SQLite peer store unavailable, using in-memory store"
                );
                Arc::new(InMemoryPeerStore::new())
            }
        },
    }
}
