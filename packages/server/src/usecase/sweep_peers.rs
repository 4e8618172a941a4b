//! UseCase: Peer-State のスイープ
//!
//! クリーンなクローズも登録解除も届かずに死んだソケットの最後の砦です。
//! 一定間隔で Peer-State をスイープし、追い出したピアごとにハブへ
//! `evict_peer` を送ります（ハブが `participant-left` を通知します）。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - SweepPeersUseCase::run_once() メソッド
//!
//! ### どのような状況を想定しているか
//! - 正常系：アイドルなピアの追い出しと通知
//! - エッジケース：追い出し対象なし（ハブを呼ばない）
//! - 異常系：ハブが停止している（スイープ結果は返す）

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::domain::{PeerStoreError, SignalingHub, SweepPolicy, SweepReport};

use super::peer_state::PeerStateService;

/// Peer-State スイープのユースケース
pub struct SweepPeersUseCase {
    /// PeerStateService（Peer-State）
    peers: Arc<PeerStateService>,
    /// SignalingHub（ハブへのハンドル）
    hub: Arc<dyn SignalingHub>,
    /// しきい値
    policy: SweepPolicy,
}

impl SweepPeersUseCase {
    /// 新しい SweepPeersUseCase を作成
    pub fn new(
        peers: Arc<PeerStateService>,
        hub: Arc<dyn SignalingHub>,
        policy: SweepPolicy,
    ) -> Self {
        Self { peers, hub, policy }
    }

    /// 1 回スイープする
    ///
    /// # Returns
    ///
    /// * `Ok(SweepReport)` - 追い出したピアと削除したルーム
    pub async fn run_once(&self) -> Result<SweepReport, PeerStoreError> {
        let report = self.peers.sweep(&self.policy).await?;

        for peer in &report.evicted {
            tracing::info!(
                meeting_id = %peer.meeting_id,
                peer_id = %peer.id,
                last_seen = peer.last_seen.value(),
                "Evicting idle peer"
            );
            if let Err(err) = self
                .hub
                .evict_peer(peer.meeting_id.clone(), peer.id.clone())
                .await
            {
                tracing::warn!(peer_id = %peer.id, error = %err, "Failed to notify eviction");
            }
        }
        for meeting_id in &report.removed_rooms {
            tracing::debug!(meeting_id = %meeting_id, "Removed expired peer room");
        }

        Ok(report)
    }

    /// 一定間隔でスイープするタスクを起動する
    ///
    /// 最初のスイープは `interval` 経過後に行います。
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if !report.is_empty() => tracing::info!(
                        evicted = report.evicted.len(),
                        removed_rooms = report.removed_rooms.len(),
                        "Peer sweep finished"
                    ),
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "Peer sweep failed"),
                }
            }
        })
    }
}
