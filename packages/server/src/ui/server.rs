//! Server execution logic.

use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post, put},
};
use kaigi_shared::time::Clock;
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::trace::TraceLayer;

use crate::{
    config::ServerConfig,
    domain::{DomainError, MeetingId},
    infrastructure::{
        hub::Hub,
        peer_store::open_peer_store,
        repository::inmemory::{
            InMemoryMeetingDirectory, InMemoryParticipantRepository, StaticIdentityResolver,
        },
    },
    usecase::{
        ConnectParticipantUseCase, DisconnectParticipantUseCase, LeaveMeetingUseCase,
        MeetingStatusUseCase, NotifyParticipantsUseCase, PeerStateService, RelaySignalUseCase,
        SweepPeersUseCase,
    },
};

use super::{
    handler::{
        broadcast_to_meeting, get_meeting_status, get_participant_count, get_participants,
        global_stats, health_check, list_peers, room_stats, send_to_client, update_peer_state,
        websocket_handler,
    },
    session::SessionTimeouts,
    signal::shutdown_signal,
    state::AppState,
};

/// Signaling server
///
/// 設定から依存関係を組み立て、HTTP / WebSocket のエンドポイントを提供します。
///
/// # Example
///
/// ```ignore
/// let config = ServerConfig::parse();
/// let server = Server::from_config(&config, Arc::new(SystemClock))?;
/// server.run().await?;
/// ```
pub struct Server {
    host: String,
    port: u16,
    state: Arc<AppState>,
    sweeper: Arc<SweepPeersUseCase>,
    sweep_interval: Duration,
    hub_task: JoinHandle<()>,
}

impl Server {
    /// 設定から Server を組み立てる
    ///
    /// ハブのタスクを起動するため、tokio のランタイム上で呼び出すこと。
    ///
    /// # Errors
    ///
    /// `--meeting` に空の会議 ID が含まれている場合
    pub fn from_config(config: &ServerConfig, clock: Arc<dyn Clock>) -> Result<Self, DomainError> {
        // Initialize dependencies in order:
        // 1. Collaborators (meeting directory, participant repository, identity resolver)
        // 2. Peer Store
        // 3. Hub
        // 4. UseCases
        // 5. AppState

        // 1. Create collaborators
        let meetings = if config.open_meetings {
            InMemoryMeetingDirectory::open()
        } else {
            let ids = config
                .meetings
                .iter()
                .map(|id| MeetingId::new(id.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            if ids.is_empty() {
                tracing::warn!(
                    "No meetings configured; every connection will be rejected (use --meeting or --open-meetings)"
                );
            }
            InMemoryMeetingDirectory::with_meetings(ids)
        };
        let meetings = Arc::new(meetings);
        let participants = Arc::new(InMemoryParticipantRepository::new());
        let identities = Arc::new(StaticIdentityResolver::new(
            config.bearer_token_map(),
            config.trust_identity_hints,
        ));

        // 2. Create Peer Store
        let store = open_peer_store(config.peer_store, &config.sqlite_path);
        let peer_state = Arc::new(PeerStateService::new(
            store,
            clock.clone(),
            config.max_peers_per_room,
        ));

        // 3. Start Hub
        let (hub, hub_task) = Hub::spawn(config.hub_channel_capacity, clock.clone());
        let hub = Arc::new(hub);

        // 4. Create UseCases
        let connect_participant_usecase = Arc::new(ConnectParticipantUseCase::new(
            meetings,
            identities,
            participants.clone(),
            hub.clone(),
            peer_state.clone(),
        ));
        let relay_signal_usecase =
            Arc::new(RelaySignalUseCase::new(hub.clone(), peer_state.clone()));
        let leave_meeting_usecase = Arc::new(LeaveMeetingUseCase::new(
            participants,
            hub.clone(),
            peer_state.clone(),
        ));
        let disconnect_participant_usecase = Arc::new(DisconnectParticipantUseCase::new(
            hub.clone(),
            peer_state.clone(),
        ));
        let meeting_status_usecase = Arc::new(MeetingStatusUseCase::new(hub.clone()));
        let notify_participants_usecase = Arc::new(NotifyParticipantsUseCase::new(hub.clone()));
        let sweeper = Arc::new(SweepPeersUseCase::new(
            peer_state.clone(),
            hub,
            config.sweep_policy(),
        ));

        // 5. Create AppState
        let state = Arc::new(AppState {
            connect_participant_usecase,
            relay_signal_usecase,
            leave_meeting_usecase,
            disconnect_participant_usecase,
            meeting_status_usecase,
            notify_participants_usecase,
            peer_state,
            clock,
            outbound_capacity: config.outbound_capacity,
            timeouts: SessionTimeouts {
                pong_wait: config.pong_wait(),
                ping_interval: config.ping_interval(),
                write_wait: config.write_wait(),
            },
        });

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            state,
            sweeper,
            sweep_interval: config.sweep_interval(),
            hub_task,
        })
    }

    /// ルーターを組み立てる
    pub fn router(&self) -> Router {
        Router::new()
            // WebSocket エンドポイント
            .route("/ws/meetings/{meeting_id}", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route(
                "/api/meetings/{meeting_id}/participants",
                get(get_participants),
            )
            .route(
                "/api/meetings/{meeting_id}/participants/count",
                get(get_participant_count),
            )
            .route("/api/meetings/{meeting_id}/status", get(get_meeting_status))
            .route("/api/meetings/{meeting_id}/send", post(broadcast_to_meeting))
            .route("/api/clients/{client_id}/send", post(send_to_client))
            .route("/api/webrtc/meetings/{meeting_id}/peers", get(list_peers))
            .route(
                "/api/webrtc/meetings/{meeting_id}/peer-state",
                put(update_peer_state),
            )
            .route("/api/webrtc/meetings/{meeting_id}/stats", get(room_stats))
            .route("/api/webrtc/stats", get(global_stats))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// 待ち受け済みのリスナーでサーバーを動かす
    ///
    /// `shutdown` が完了するとグレースフルに停止し、スイープのタスクも止める。
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let sweep_task = self.sweeper.clone().spawn(self.sweep_interval);

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        sweep_task.abort();
        // 残っているハンドルごと AppState を手放すとハブのループも終わる
        drop(self.state);
        drop(self.sweeper);
        if tokio::time::timeout(Duration::from_secs(1), self.hub_task)
            .await
            .is_err()
        {
            tracing::debug!("Hub task still running after shutdown");
        }
        result
    }

    /// Run the signaling server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the configured address or
    /// if there's an error during server execution.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        // Bind the server to the host and port
        let bind_addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&bind_addr).await?;

        // Start the server
        tracing::info!("Signaling server listening on {}", listener.local_addr()?);
        tracing::info!("Connect to: ws://{}/ws/meetings/{{meeting_id}}", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        self.serve(listener, shutdown_signal()).await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }
}
