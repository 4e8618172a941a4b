//! Signaling Router (Hub)
//!
//! ## 概要
//!
//! Connection Registry と Room Directory を所有する単一ライターのアクターです。
//! 多数のセッションタスクからのイベント（登録・登録解除・受信メッセージ・問い合わせ）を
//! 1 本のイベントループで直列に処理するため、メンバーシップの状態にロックは不要です。
//!
//! ## イベントの順序
//!
//! 登録・登録解除・受信メッセージは 1 本のチャネル（`HubEvent`）に積まれ、
//! 積まれた順に処理されます。同じセッションが送ったものは送った順に反映されるため、
//! `leave` の直前に送ったチャットが退出より後回しになることはありません。
//!
//! 問い合わせ（参加者数など）や外部からの送信は別のチャネル（`HubCommand`）で受け、
//! イベントのチャネルが空のときだけ処理します。問い合わせは先に積まれたイベントを
//! すべて反映した状態に答えます。
//!
//! ## 送信の失敗
//!
//! 送信はすべてノンブロッキングです。送信キューが満杯（または閉じている）接続は
//! 死んでいるとみなして取り除き、残りのメンバーに `participant-left` を通知します。
//! 通知自体が別の接続の退去を引き起こすことがあるため、退去はキューで順に処理します。

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use kaigi_shared::time::Clock;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::domain::{
    ClientId, ClientProfile, ClientSummary, ConnectionToken, Delivery, HubError, LeaveReason,
    MeetingId, MessageKind, OutboundFrame, OutboundSender, SendError, SignalPayload, SignalType,
    SignalingHub, SignalingMessage, Timestamp, UnregisterOutcome,
};
use crate::infrastructure::dto::conversion::encode_frame;

use super::{connection::Connection, directory::RoomDirectory, registry::ConnectionRegistry};

struct RegisterRequest {
    meeting_id: MeetingId,
    profile: ClientProfile,
    outbound: OutboundSender,
    respond_to: oneshot::Sender<ConnectionToken>,
}

struct UnregisterRequest {
    client_id: ClientId,
    token: Option<ConnectionToken>,
    reason: LeaveReason,
    respond_to: oneshot::Sender<UnregisterOutcome>,
}

struct InboundMessage {
    token: ConnectionToken,
    message: SignalingMessage,
}

/// Session lifecycle events, handled strictly in arrival order.
enum HubEvent {
    Register(RegisterRequest),
    Unregister(UnregisterRequest),
    Inbound(InboundMessage),
}

enum HubCommand {
    BroadcastToMeeting {
        meeting_id: MeetingId,
        message: SignalingMessage,
    },
    SendToClient {
        client_id: ClientId,
        message: SignalingMessage,
        respond_to: oneshot::Sender<Result<(), SendError>>,
    },
    Participants {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Vec<ClientSummary>>,
    },
    Count {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<usize>,
    },
    IsActive {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<bool>,
    },
    EvictPeer {
        meeting_id: MeetingId,
        client_id: ClientId,
    },
}

/// Handle to a running [`Hub`].
///
/// クローンして各セッション・UseCase に配ります。すべてのハンドルが drop されると
/// ハブのイベントループは終了します。
#[derive(Clone)]
pub struct HubHandle {
    event_tx: mpsc::Sender<HubEvent>,
    command_tx: mpsc::Sender<HubCommand>,
}

/// Signaling hub actor.
pub struct Hub {
    registry: ConnectionRegistry,
    directory: RoomDirectory,
    clock: Arc<dyn Clock>,
    next_token: u64,
    evictions: VecDeque<(MeetingId, ClientId)>,
    event_rx: mpsc::Receiver<HubEvent>,
    command_rx: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// ハブを起動し、ハンドルとタスクの JoinHandle を返す
    ///
    /// `channel_capacity` はイベント・コマンドそれぞれのチャネルの容量です。
    pub fn spawn(channel_capacity: usize, clock: Arc<dyn Clock>) -> (HubHandle, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::channel(channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(channel_capacity);

        let hub = Self {
            registry: ConnectionRegistry::new(),
            directory: RoomDirectory::new(),
            clock,
            next_token: 1,
            evictions: VecDeque::new(),
            event_rx,
            command_rx,
        };
        let task = tokio::spawn(hub.run());

        let handle = HubHandle {
            event_tx,
            command_tx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        tracing::info!("Signaling hub started");

        loop {
            tokio::select! {
                biased;

                Some(event) = self.event_rx.recv() => self.handle_event(event),
                Some(command) = self.command_rx.recv() => self.handle_command(command),
                else => break,
            }
            self.settle_evictions();
        }

        tracing::info!(
            connections = self.registry.len(),
            rooms = self.directory.room_count(),
            "Signaling hub stopped"
        );
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(request) => self.handle_register(request),
            HubEvent::Unregister(request) => {
                let outcome =
                    self.handle_unregister(&request.client_id, request.token, request.reason);
                let _ = request.respond_to.send(outcome);
            }
            HubEvent::Inbound(inbound) => self.handle_inbound(inbound.token, inbound.message),
        }
    }

    // ========================================
    // register / unregister
    // ========================================

    fn handle_register(&mut self, request: RegisterRequest) {
        let RegisterRequest {
            meeting_id,
            profile,
            outbound,
            respond_to,
        } = request;
        let token = ConnectionToken::new(self.next_token);
        self.next_token += 1;
        let client_id = profile.id.clone();
        let now = self.now();

        let connection = Connection::new(profile.clone(), meeting_id.clone(), token, now, outbound);
        if let Some(replaced) = self.registry.register(connection) {
            // 古いトランスポートは送信キューの drop で閉じられる
            tracing::info!(
                client_id = %client_id,
                meeting_id = %replaced.meeting_id,
                old_token = %replaced.token,
                new_token = %token,
                "Replacing duplicate connection"
            );
            self.directory.leave(&replaced.meeting_id, &client_id);
            let left = SignalingMessage::participant_left(replaced.meeting_id.clone(), &client_id, now);
            self.broadcast(&replaced.meeting_id, &left, None);
        }
        self.directory.join(&meeting_id, &client_id);

        if respond_to.send(token).is_err() {
            // 登録を待っていたセッションが既にいない。participant-joined を
            // まだ誰にも送っていないので、participant-left も送らずに取り除く
            tracing::debug!(client_id = %client_id, "Registration abandoned by session");
            if self.registry.unregister(&client_id, Some(token)).is_some() {
                self.directory.leave(&meeting_id, &client_id);
            }
            return;
        }

        tracing::info!(
            client_id = %client_id,
            meeting_id = %meeting_id,
            token = %token,
            participants = self.directory.count(&meeting_id),
            "Client registered"
        );

        let joined = SignalingMessage::participant_joined(meeting_id.clone(), &profile, now);
        self.broadcast(&meeting_id, &joined, Some(&client_id));
    }

    fn handle_unregister(
        &mut self,
        client_id: &ClientId,
        token: Option<ConnectionToken>,
        reason: LeaveReason,
    ) -> UnregisterOutcome {
        let Some(connection) = self.registry.unregister(client_id, token) else {
            let outcome = if self.registry.contains(client_id) {
                UnregisterOutcome::Replaced
            } else {
                UnregisterOutcome::AlreadyGone
            };
            tracing::debug!(
                client_id = %client_id,
                reason = %reason,
                outcome = ?outcome,
                "Unregister ignored: connection already gone or replaced"
            );
            return outcome;
        };
        self.directory.leave(&connection.meeting_id, client_id);
        tracing::info!(
            client_id = %client_id,
            meeting_id = %connection.meeting_id,
            reason = %reason,
            participants = self.directory.count(&connection.meeting_id),
            "Client unregistered"
        );

        let left =
            SignalingMessage::participant_left(connection.meeting_id.clone(), client_id, self.now());
        self.broadcast(&connection.meeting_id, &left, None);
        UnregisterOutcome::Removed
    }

    /// 送信失敗で取り除かれた接続の後始末
    fn settle_evictions(&mut self) {
        while let Some((meeting_id, client_id)) = self.evictions.pop_front() {
            if !self.directory.leave(&meeting_id, &client_id) {
                continue;
            }
            tracing::warn!(
                client_id = %client_id,
                meeting_id = %meeting_id,
                reason = %LeaveReason::Backpressure,
                "Dropped stalled connection"
            );
            let left = SignalingMessage::participant_left(meeting_id.clone(), &client_id, self.now());
            self.broadcast(&meeting_id, &left, None);
        }
    }

    // ========================================
    // inbound messages
    // ========================================

    fn handle_inbound(&mut self, token: ConnectionToken, message: SignalingMessage) {
        let Some(sender_id) = message.from.clone() else {
            tracing::warn!(kind = message.kind.as_str(), "Dropping inbound message without sender");
            return;
        };
        let Some(sender) = self.registry.lookup(&sender_id) else {
            tracing::debug!(
                client_id = %sender_id,
                kind = message.kind.as_str(),
                "Dropping message from unregistered client"
            );
            return;
        };
        if sender.token != token {
            tracing::debug!(
                client_id = %sender_id,
                token = %token,
                live_token = %sender.token,
                "Dropping message from replaced connection"
            );
            return;
        }
        if sender.meeting_id != message.meeting_id {
            tracing::warn!(
                client_id = %sender_id,
                meeting_id = %message.meeting_id,
                "Dropping message addressed to another meeting"
            );
            return;
        }

        let kind = match &message.kind {
            MessageKind::Known(kind) => *kind,
            MessageKind::Unknown(tag) => {
                tracing::warn!(client_id = %sender_id, kind = %tag, "Dropping unknown message type");
                return;
            }
        };
        tracing::debug!(client_id = %sender_id, kind = kind.as_str(), "Routing message");

        match kind.delivery() {
            Delivery::Direct => self.route_direct(message),
            Delivery::RoomWithSender => {
                let meeting_id = message.meeting_id.clone();
                self.broadcast(&meeting_id, &message, None);
            }
            Delivery::RoomExceptSender => {
                let message = self.enrich_typing(message);
                let meeting_id = message.meeting_id.clone();
                self.broadcast(&meeting_id, &message, Some(&sender_id));
            }
            Delivery::Membership if kind == SignalType::Join => {
                self.send_roster(&message.meeting_id.clone(), &sender_id);
            }
            Delivery::Membership => {
                self.handle_unregister(&sender_id, Some(token), LeaveReason::Left);
            }
            Delivery::ServerOnly => {
                tracing::warn!(
                    client_id = %sender_id,
                    kind = kind.as_str(),
                    "Dropping server-only message sent by client"
                );
            }
        }
    }

    /// offer / answer / ice-candidate を `to` の相手に届ける
    fn route_direct(&mut self, message: SignalingMessage) {
        let from = message.from.as_ref().map(ToString::to_string).unwrap_or_default();
        let Some(target_id) = message.to.clone() else {
            tracing::warn!(client_id = %from, kind = message.kind.as_str(), "Dropping direct message without target");
            return;
        };
        let same_meeting = self
            .registry
            .lookup(&target_id)
            .is_some_and(|target| target.meeting_id == message.meeting_id);
        if !same_meeting {
            tracing::warn!(
                client_id = %from,
                target = %target_id,
                meeting_id = %message.meeting_id,
                kind = message.kind.as_str(),
                "Dropping direct message: target not registered in this meeting"
            );
            return;
        }
        let Some(frame) = encode(&message) else {
            return;
        };
        if let Err(err) = self.send_frame(&target_id, frame) {
            tracing::warn!(client_id = %from, target = %target_id, error = %err, "Direct delivery failed");
        }
    }

    /// 新しく参加したクライアントに、既存メンバー 1 人につき 1 通の
    /// `participant-joined` を送る
    fn send_roster(&mut self, meeting_id: &MeetingId, client_id: &ClientId) {
        let now = self.now();
        let roster: Vec<SignalingMessage> = self
            .directory
            .members_of(meeting_id)
            .into_iter()
            .filter(|member| member != client_id)
            .filter_map(|member| self.registry.lookup(&member))
            .map(|member| {
                let mut message =
                    SignalingMessage::participant_joined(meeting_id.clone(), &member.profile, now);
                message.to = Some(client_id.clone());
                message
            })
            .collect();
        tracing::debug!(client_id = %client_id, members = roster.len(), "Sending roster");

        for message in roster {
            let Some(frame) = encode(&message) else {
                continue;
            };
            if self.send_frame(client_id, frame).is_err() {
                break;
            }
        }
    }

    /// タイピング通知に送信者の情報を付け加える
    fn enrich_typing(&self, mut message: SignalingMessage) -> SignalingMessage {
        let sender = message
            .from
            .as_ref()
            .and_then(|from| self.registry.lookup(from));
        if let (Some(sender), SignalPayload::Typing(typing)) = (sender, &mut message.payload) {
            typing.user_id = sender.profile.identity.user_id();
            typing.public_user_id = sender.profile.identity.public_user_id();
            typing.user_name = Some(sender.profile.display_name.as_str().to_string());
        }
        message
    }

    // ========================================
    // commands
    // ========================================

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::BroadcastToMeeting {
                meeting_id,
                message,
            } => {
                self.broadcast(&meeting_id, &message, None);
            }
            HubCommand::SendToClient {
                client_id,
                message,
                respond_to,
            } => {
                let result = match encode(&message) {
                    Some(frame) => self.send_frame(&client_id, frame),
                    None => Err(SendError::Closed(client_id.to_string())),
                };
                let _ = respond_to.send(result);
            }
            HubCommand::Participants {
                meeting_id,
                respond_to,
            } => {
                let participants = self
                    .directory
                    .members_of(&meeting_id)
                    .iter()
                    .filter_map(|id| self.registry.lookup(id))
                    .map(Connection::summary)
                    .collect();
                let _ = respond_to.send(participants);
            }
            HubCommand::Count {
                meeting_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.directory.count(&meeting_id));
            }
            HubCommand::IsActive {
                meeting_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.directory.is_active(&meeting_id));
            }
            HubCommand::EvictPeer {
                meeting_id,
                client_id,
            } => self.evict_peer(&meeting_id, &client_id),
        }
    }

    /// スイープで追い出されたピアを反映する
    fn evict_peer(&mut self, meeting_id: &MeetingId, client_id: &ClientId) {
        let registered_here = self
            .registry
            .lookup(client_id)
            .is_some_and(|connection| &connection.meeting_id == meeting_id);
        if registered_here {
            self.handle_unregister(client_id, None, LeaveReason::Evicted);
        } else {
            let left = SignalingMessage::participant_left(meeting_id.clone(), client_id, self.now());
            self.broadcast(meeting_id, &left, None);
        }
    }

    // ========================================
    // delivery
    // ========================================

    /// ルームのメンバー全員（`except` を除く）に送る
    ///
    /// 1 人への送信失敗は他のメンバーへの配送を妨げない。
    fn broadcast(
        &mut self,
        meeting_id: &MeetingId,
        message: &SignalingMessage,
        except: Option<&ClientId>,
    ) {
        let Some(frame) = encode(message) else {
            return;
        };
        for member in self.directory.members_of(meeting_id) {
            if except.is_some_and(|except| except == &member) {
                continue;
            }
            // 失敗はログと退去キューで処理済み
            let _ = self.send_frame(&member, frame.clone());
        }
    }

    fn send_frame(&mut self, client_id: &ClientId, frame: OutboundFrame) -> Result<(), SendError> {
        let meeting_id = self
            .registry
            .lookup(client_id)
            .map(|connection| connection.meeting_id.clone());
        let result = self.registry.send_to(client_id, frame);
        if let (Err(err @ (SendError::QueueFull(_) | SendError::Closed(_))), Some(meeting_id)) =
            (&result, meeting_id)
        {
            tracing::warn!(client_id = %client_id, error = %err, "Outbound queue unusable, evicting");
            self.evictions.push_back((meeting_id, client_id.clone()));
        }
        result
    }
}

fn encode(message: &SignalingMessage) -> Option<OutboundFrame> {
    match encode_frame(message) {
        Ok(frame) => Some(frame),
        Err(err) => {
            tracing::error!(kind = message.kind.as_str(), error = %err, "Failed to encode message");
            None
        }
    }
}

impl HubHandle {
    async fn event(&self, event: HubEvent) -> Result<(), HubError> {
        self.event_tx.send(event).await.map_err(|_| HubError::Stopped)
    }

    async fn command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, HubError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }
}

#[async_trait]
impl SignalingHub for HubHandle {
    async fn register(
        &self,
        meeting_id: MeetingId,
        profile: ClientProfile,
        outbound: OutboundSender,
    ) -> Result<ConnectionToken, HubError> {
        let (tx, rx) = oneshot::channel();
        self.event(HubEvent::Register(RegisterRequest {
            meeting_id,
            profile,
            outbound,
            respond_to: tx,
        }))
        .await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    async fn unregister(
        &self,
        client_id: ClientId,
        token: Option<ConnectionToken>,
        reason: LeaveReason,
    ) -> Result<UnregisterOutcome, HubError> {
        let (tx, rx) = oneshot::channel();
        self.event(HubEvent::Unregister(UnregisterRequest {
            client_id,
            token,
            reason,
            respond_to: tx,
        }))
        .await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    async fn submit(
        &self,
        token: ConnectionToken,
        message: SignalingMessage,
    ) -> Result<(), HubError> {
        self.event(HubEvent::Inbound(InboundMessage { token, message }))
            .await
    }

    async fn broadcast_to_meeting(
        &self,
        meeting_id: MeetingId,
        message: SignalingMessage,
    ) -> Result<(), HubError> {
        self.command_tx
            .send(HubCommand::BroadcastToMeeting {
                meeting_id,
                message,
            })
            .await
            .map_err(|_| HubError::Stopped)
    }

    async fn send_to_client(
        &self,
        client_id: ClientId,
        message: SignalingMessage,
    ) -> Result<(), HubError> {
        self.command(|respond_to| HubCommand::SendToClient {
            client_id,
            message,
            respond_to,
        })
        .await?
        .map_err(HubError::from)
    }

    async fn participants(&self, meeting_id: MeetingId) -> Result<Vec<ClientSummary>, HubError> {
        self.command(|respond_to| HubCommand::Participants {
            meeting_id,
            respond_to,
        })
        .await
    }

    async fn participant_count(&self, meeting_id: MeetingId) -> Result<usize, HubError> {
        self.command(|respond_to| HubCommand::Count {
            meeting_id,
            respond_to,
        })
        .await
    }

    async fn is_meeting_active(&self, meeting_id: MeetingId) -> Result<bool, HubError> {
        self.command(|respond_to| HubCommand::IsActive {
            meeting_id,
            respond_to,
        })
        .await
    }

    async fn evict_peer(
        &self,
        meeting_id: MeetingId,
        client_id: ClientId,
    ) -> Result<(), HubError> {
        self.command_tx
            .send(HubCommand::EvictPeer {
                meeting_id,
                client_id,
            })
            .await
            .map_err(|_| HubError::Stopped)
    }
}
