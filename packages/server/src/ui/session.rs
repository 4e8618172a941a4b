//! Connection Session (read / write pumps)
//!
//! 1 接続につき 2 つのタスクを動かします。
//!
//! - 読み込みポンプ: フレームをデコードして UseCase 経由でハブに渡す。
//!   `pong_wait` の間に何も届かなければ接続は死んでいるとみなす
//! - 書き込みポンプ: 送信キューをソケットに書き出し、`ping_interval` ごとに ping を送る。
//!   送信キューが閉じられたら（ハブから外されたら）Close フレームを送って終了する
//!
//! どちらかが終わった時点でもう片方も止め、登録解除（退出または切断）を 1 回だけ行います。

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket},
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use tokio::{sync::mpsc, time::Instant};

use crate::{
    domain::{OutboundFrame, SignalType, Timestamp},
    infrastructure::dto::conversion::decode_inbound,
    usecase::ConnectionTicket,
};

use super::state::AppState;

/// セッションのタイムアウト設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// 読み込みの期限（pong を含め、何か届くたびに延長）
    pub pong_wait: Duration,
    /// ping の間隔（`pong_wait` より短いこと）
    pub ping_interval: Duration,
    /// 1 フレームの書き込み期限
    pub write_wait: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// 読み込みポンプの終わり方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    /// クライアントが `leave` を送った
    Left,
    /// クローズ、エラー、または生存確認のタイムアウト
    Closed,
}

/// 登録済みの接続のセッションを最後まで動かす
pub async fn run(
    socket: WebSocket,
    state: Arc<AppState>,
    ticket: ConnectionTicket,
    outbound: mpsc::Receiver<OutboundFrame>,
) {
    let (sink, stream) = socket.split();
    let timeouts = state.timeouts;

    let mut write_task = tokio::spawn(write_pump(sink, outbound, timeouts));
    let mut read_task = tokio::spawn(read_pump(stream, state.clone(), ticket.clone()));

    let read_end = tokio::select! {
        result = &mut read_task => result.unwrap_or(ReadEnd::Closed),
        _ = &mut write_task => {
            read_task.abort();
            ReadEnd::Closed
        }
    };

    match read_end {
        ReadEnd::Left => {
            if let Err(err) = state.leave_meeting_usecase.execute(&ticket).await {
                tracing::error!(client_id = %ticket.profile.id, error = %err, "Failed to leave meeting");
            }
            // 登録解除で送信キューが閉じ、書き込みポンプが Close フレームを送って終わる
            if tokio::time::timeout(timeouts.write_wait, &mut write_task)
                .await
                .is_err()
            {
                write_task.abort();
            }
        }
        ReadEnd::Closed => {
            write_task.abort();
            if let Err(err) = state.disconnect_participant_usecase.execute(&ticket).await {
                tracing::error!(client_id = %ticket.profile.id, error = %err, "Failed to disconnect participant");
            }
        }
    }

    tracing::info!(
        client_id = %ticket.profile.id,
        meeting_id = %ticket.meeting_id,
        "Session closed"
    );
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    state: Arc<AppState>,
    ticket: ConnectionTicket,
) -> ReadEnd {
    let pong_wait = state.timeouts.pong_wait;

    loop {
        let message = match tokio::time::timeout(pong_wait, stream.next()).await {
            Err(_) => {
                tracing::warn!(
                    client_id = %ticket.profile.id,
                    "No frame within the liveness deadline, closing connection"
                );
                return ReadEnd::Closed;
            }
            Ok(None) => return ReadEnd::Closed,
            Ok(Some(Err(err))) => {
                tracing::error!(client_id = %ticket.profile.id, error = %err, "WebSocket read error");
                return ReadEnd::Closed;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if handle_text(&state, &ticket, text.as_str()).await == Some(SignalType::Leave) {
                    return ReadEnd::Left;
                }
            }
            Message::Pong(_) => {
                if let Err(err) = state
                    .peer_state
                    .touch(&ticket.meeting_id, &ticket.profile.id)
                    .await
                {
                    tracing::debug!(client_id = %ticket.profile.id, error = %err, "Pong from peer without state");
                }
            }
            Message::Ping(_) => {
                // pong は axum が自動で返す
            }
            Message::Binary(_) => {
                tracing::warn!(client_id = %ticket.profile.id, "Dropping binary frame");
            }
            Message::Close(_) => {
                tracing::info!(client_id = %ticket.profile.id, "Client requested close");
                return ReadEnd::Closed;
            }
        }
    }
}

/// テキストフレームを 1 つ処理し、既知の種類なら返す
async fn handle_text(state: &AppState, ticket: &ConnectionTicket, text: &str) -> Option<SignalType> {
    let now = Timestamp::new(state.clock.now_millis());
    let message = match decode_inbound(text, &ticket.meeting_id, &ticket.profile.id, now) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(client_id = %ticket.profile.id, error = %err, "Dropping malformed frame");
            return None;
        }
    };

    let signal = message.signal_type();
    if signal == Some(SignalType::Leave) {
        return signal;
    }
    if let Err(err) = state.relay_signal_usecase.execute(ticket, message).await {
        tracing::error!(client_id = %ticket.profile.id, error = %err, "Failed to relay message");
    }
    signal
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    timeouts: SessionTimeouts,
) {
    let mut ping = tokio::time::interval_at(
        Instant::now() + timeouts.ping_interval,
        timeouts.ping_interval,
    );

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let message = Message::Text(frame.to_string().into());
                    if let Err(reason) = write_frame(&mut sink, message, timeouts.write_wait).await {
                        tracing::error!(reason = %reason, "WebSocket write failed");
                        return;
                    }
                }
                None => {
                    let _ = write_frame(&mut sink, Message::Close(None), timeouts.write_wait).await;
                    return;
                }
            },
            _ = ping.tick() => {
                if let Err(reason) = write_frame(&mut sink, Message::Ping(Bytes::new()), timeouts.write_wait).await {
                    tracing::error!(reason = %reason, "WebSocket ping failed");
                    return;
                }
            }
        }
    }
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), String> {
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("write deadline exceeded".to_string()),
    }
}
