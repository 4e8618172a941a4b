//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kaigi_shared::time::timestamp_to_rfc3339;

use crate::{
    domain::{ClientId, HubError, MeetingId, PeerState, PeerStoreError, SendError},
    infrastructure::dto::{
        conversion::build_server_message,
        http::{
            ErrorResponse, GlobalStatsResponse, HealthResponse, MeetingStatusResponse,
            ParticipantCountResponse, ParticipantDto, ParticipantsResponse, PeerDto,
            PeersResponse, RoomStatsResponse, SendRequest, UpdatePeerStateRequest,
        },
    },
    ui::state::AppState,
};

type ApiResult<T> = Result<Json<T>, Response>;

/// エラーレスポンスを組み立てる
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn hub_error(err: HubError) -> Response {
    let status = match &err {
        HubError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        HubError::Send(SendError::NotFound(_)) => StatusCode::NOT_FOUND,
        HubError::Send(SendError::QueueFull(_) | SendError::Closed(_)) => StatusCode::CONFLICT,
    };
    error_response(status, err.to_string())
}

fn peer_store_error(err: PeerStoreError) -> Response {
    let status = match &err {
        PeerStoreError::PeerNotFound { .. } | PeerStoreError::RoomNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        PeerStoreError::RoomFull { .. } => StatusCode::CONFLICT,
        PeerStoreError::Unavailable(_)
        | PeerStoreError::Backend(_)
        | PeerStoreError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, err.to_string())
}

fn parse_meeting_id(raw: String) -> Result<MeetingId, Response> {
    MeetingId::new(raw).map_err(|err| error_response(StatusCode::BAD_REQUEST, err.to_string()))
}

fn parse_client_id(raw: String) -> Result<ClientId, Response> {
    ClientId::new(raw).map_err(|err| error_response(StatusCode::BAD_REQUEST, err.to_string()))
}

// ========================================
// Health
// ========================================

/// `GET /api/health`
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: timestamp_to_rfc3339(state.clock.now_millis()),
    })
}

// ========================================
// Meeting status
// ========================================

/// `GET /api/meetings/{meeting_id}/participants`
pub async fn get_participants(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
) -> ApiResult<ParticipantsResponse> {
    let meeting_id = parse_meeting_id(meeting_id)?;
    let participants = state
        .meeting_status_usecase
        .participants(&meeting_id)
        .await
        .map_err(hub_error)?;

    // Domain Model から DTO への変換
    let participants: Vec<ParticipantDto> = participants.into_iter().map(Into::into).collect();
    Ok(Json(ParticipantsResponse {
        meeting_id: meeting_id.into_string(),
        count: participants.len(),
        participants,
    }))
}

/// `GET /api/meetings/{meeting_id}/participants/count`
pub async fn get_participant_count(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
) -> ApiResult<ParticipantCountResponse> {
    let meeting_id = parse_meeting_id(meeting_id)?;
    let count = state
        .meeting_status_usecase
        .participant_count(&meeting_id)
        .await
        .map_err(hub_error)?;
    Ok(Json(ParticipantCountResponse {
        meeting_id: meeting_id.into_string(),
        count,
    }))
}

/// `GET /api/meetings/{meeting_id}/status`
pub async fn get_meeting_status(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
) -> ApiResult<MeetingStatusResponse> {
    let meeting_id = parse_meeting_id(meeting_id)?;
    let status = state
        .meeting_status_usecase
        .status(&meeting_id)
        .await
        .map_err(hub_error)?;
    Ok(Json(MeetingStatusResponse {
        meeting_id: status.meeting_id.into_string(),
        active: status.active,
        participant_count: status.participant_count,
    }))
}

// ========================================
// Notifications from collaborators
// ========================================

/// `POST /api/meetings/{meeting_id}/send`
pub async fn broadcast_to_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<StatusCode, Response> {
    let meeting_id = parse_meeting_id(meeting_id)?;
    let message = build_message(&state, &request, meeting_id, None)?;
    state
        .notify_participants_usecase
        .broadcast(message)
        .await
        .map_err(hub_error)?;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /api/clients/{client_id}/send`
pub async fn send_to_client(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<StatusCode, Response> {
    let client_id = parse_client_id(client_id)?;
    let meeting_id = request
        .meeting_id
        .clone()
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "meetingId is required"))
        .and_then(parse_meeting_id)?;
    let message = build_message(&state, &request, meeting_id, Some(client_id.clone()))?;
    state
        .notify_participants_usecase
        .send_to_client(client_id, message)
        .await
        .map_err(hub_error)?;
    Ok(StatusCode::ACCEPTED)
}

fn build_message(
    state: &AppState,
    request: &SendRequest,
    meeting_id: MeetingId,
    to: Option<ClientId>,
) -> Result<crate::domain::SignalingMessage, Response> {
    let now = crate::domain::Timestamp::new(state.clock.now_millis());
    let message = build_server_message(&request.kind, meeting_id, to, request.data.clone(), now)
        .map_err(|err| error_response(StatusCode::BAD_REQUEST, err.to_string()))?;
    if message.signal_type().is_none() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown message type '{}'", request.kind),
        ));
    }
    Ok(message)
}

// ========================================
// Peer state
// ========================================

/// `GET /api/webrtc/meetings/{meeting_id}/peers`
pub async fn list_peers(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
) -> ApiResult<PeersResponse> {
    let meeting_id = parse_meeting_id(meeting_id)?;
    let peers = state
        .peer_state
        .list_peers(&meeting_id)
        .await
        .map_err(peer_store_error)?;

    // Domain Model から DTO への変換
    let peers: Vec<PeerDto> = peers.into_iter().map(Into::into).collect();
    Ok(Json(PeersResponse {
        meeting_id: meeting_id.into_string(),
        count: peers.len(),
        peers,
    }))
}

/// `PUT /api/webrtc/meetings/{meeting_id}/peer-state`
pub async fn update_peer_state(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
    Json(request): Json<UpdatePeerStateRequest>,
) -> ApiResult<PeerDto> {
    let meeting_id = parse_meeting_id(meeting_id)?;
    let peer_id = parse_client_id(request.peer_id)?;
    let new_state: PeerState = request
        .state
        .parse()
        .map_err(|err: crate::domain::DomainError| {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        })?;
    let record = state
        .peer_state
        .update_state(&meeting_id, &peer_id, new_state)
        .await
        .map_err(peer_store_error)?;
    Ok(Json(record.into()))
}

/// `GET /api/webrtc/meetings/{meeting_id}/stats`
pub async fn room_stats(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
) -> ApiResult<RoomStatsResponse> {
    let meeting_id = parse_meeting_id(meeting_id)?;
    let stats = state
        .peer_state
        .room_stats(&meeting_id)
        .await
        .map_err(peer_store_error)?;
    Ok(Json(stats.into()))
}

/// `GET /api/webrtc/stats`
pub async fn global_stats(State(state): State<Arc<AppState>>) -> ApiResult<GlobalStatsResponse> {
    let stats = state
        .peer_state
        .global_stats()
        .await
        .map_err(peer_store_error)?;
    Ok(Json(stats.into()))
}
