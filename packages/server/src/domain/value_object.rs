//! Value objects
//!
//! 識別子やタイムスタンプなど、不変で検証済みの値を表す型を定義します。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Maximum accepted length of a client id.
pub const MAX_CLIENT_ID_LEN: usize = 256;
/// Maximum accepted length of a meeting id.
pub const MAX_MEETING_ID_LEN: usize = 128;
/// Maximum accepted length of a client-supplied session id.
///
/// Sized so that the `session_<meetingId>_<sessionId>` composite always fits
/// in [`MAX_CLIENT_ID_LEN`].
pub const MAX_SESSION_ID_LEN: usize =
    MAX_CLIENT_ID_LEN - MAX_MEETING_ID_LEN - "session__".len();
/// Maximum accepted length of a display name.
pub const MAX_DISPLAY_NAME_LEN: usize = 100;

fn validate(kind: &'static str, value: &str, max_len: usize) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::Empty(kind));
    }
    if value.chars().count() > max_len {
        return Err(DomainError::TooLong { kind, max: max_len });
    }
    Ok(())
}

/// Stable identity of a signaling connection.
///
/// Derived deterministically from the caller's identity (see
/// [`crate::domain::identity::derive_client_id`]), so a reconnecting client
/// reuses the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    pub fn new(value: String) -> Result<Self, DomainError> {
        validate("client id", &value, MAX_CLIENT_ID_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for ClientId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientId> for String {
    fn from(value: ClientId) -> Self {
        value.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a meeting, and therefore of its room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeetingId(String);

impl MeetingId {
    pub fn new(value: String) -> Result<Self, DomainError> {
        validate("meeting id", &value, MAX_MEETING_ID_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MeetingId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MeetingId> for String {
    fn from(value: MeetingId) -> Self {
        value.0
    }
}

impl fmt::Display for MeetingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human readable participant name shown to other members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn new(value: String) -> Result<Self, DomainError> {
        validate("display name", &value, MAX_DISPLAY_NAME_LEN)?;
        Ok(Self(value.trim().to_string()))
    }

    /// Build a name produced by the server itself, truncating instead of
    /// rejecting.
    pub(crate) fn generated(value: String) -> Self {
        Self(value.trim().chars().take(MAX_DISPLAY_NAME_LEN).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unix timestamp in milliseconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed from `self` until `later` (zero if `later` is earlier).
    pub fn elapsed_until(&self, later: Timestamp) -> i64 {
        (later.0 - self.0).max(0)
    }
}

/// Per-connection token distinguishing successive connections that share
/// one [`ClientId`].
///
/// Tokens are handed out in increasing order, so a replaced connection always
/// holds a smaller token than its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionToken(u64);

impl ConnectionToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
