//! Request handlers.

mod http;
mod websocket;

pub use http::{
    broadcast_to_meeting, get_meeting_status, get_participant_count, get_participants,
    global_stats, health_check, list_peers, room_stats, send_to_client, update_peer_state,
};
pub use websocket::websocket_handler;
