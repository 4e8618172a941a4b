//! WebSocket connection handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, ws::WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    domain::{IdentityHints, MeetingId},
    ui::{session, state::AppState},
    usecase::ConnectError,
};

use super::http::error_response;

/// Query parameters for WebSocket connection
///
/// `clientId` も受け付けるが使わない（ID は常にサーバー側で導出する）。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub client_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub public_user_id: Option<String>,
    pub name: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn connect_error_status(err: &ConnectError) -> StatusCode {
    match err {
        ConnectError::MeetingNotFound(_) => StatusCode::NOT_FOUND,
        ConnectError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
        ConnectError::RoomFull { .. } => StatusCode::CONFLICT,
        ConnectError::MeetingLookup(_) | ConnectError::Hub(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// `GET /ws/meetings/{meeting_id}`
///
/// 本人確認と登録はアップグレード前に行い、失敗したら HTTP のステータスで拒否する。
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> Response {
    let meeting_id = match MeetingId::new(meeting_id) {
        Ok(id) => id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    if let Some(client_id) = &query.client_id {
        tracing::debug!(client_id = %client_id, "Ignoring client-supplied clientId");
    }
    let hints = IdentityHints {
        bearer_token: bearer_token(&headers),
        user_id: query.user_id,
        public_user_id: query.public_user_id,
        session_id: query.session_id,
        name: query.name,
    };

    // 1. 会議の存在確認と本人確認
    let plan = match state
        .connect_participant_usecase
        .authorize(meeting_id, &hints)
        .await
    {
        Ok(plan) => plan,
        Err(err) => {
            tracing::warn!(error = %err, "Rejecting WebSocket connection");
            return error_response(connect_error_status(&err), err.to_string());
        }
    };

    // 2. ハブへの登録
    let (tx, rx) = mpsc::channel(state.outbound_capacity);
    let ticket = match state.connect_participant_usecase.execute(plan, tx).await {
        Ok(ticket) => ticket,
        Err(err) => {
            tracing::warn!(error = %err, "Rejecting WebSocket connection");
            return error_response(connect_error_status(&err), err.to_string());
        }
    };
    tracing::info!(
        client_id = %ticket.profile.id,
        meeting_id = %ticket.meeting_id,
        name = %ticket.profile.display_name,
        "Client connected"
    );

    // 3. アップグレード（失敗したら登録を取り消す）
    let failed_state = state.clone();
    let failed_ticket = ticket.clone();
    ws.on_failed_upgrade(move |err| {
        tracing::error!(client_id = %failed_ticket.profile.id, error = %err, "WebSocket upgrade failed");
        tokio::spawn(async move {
            let _ = failed_state
                .disconnect_participant_usecase
                .execute(&failed_ticket)
                .await;
        });
    })
    .on_upgrade(move |socket| session::run(socket, state, ticket, rx))
    .into_response()
}
