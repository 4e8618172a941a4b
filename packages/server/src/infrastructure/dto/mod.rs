//! Data Transfer Objects (DTOs)
//!
//! DTOs are organized by protocol:
//! - `websocket`: signaling envelope exchanged over the WebSocket
//! - `http`: HTTP API request / response bodies

pub mod conversion;
pub mod http;
pub mod websocket;
