//! Client identity and deterministic client-id derivation.
//!
//! A reconnecting client must land on the same [`ClientId`] it had before,
//! otherwise every reconnect adds a new room member instead of replacing the
//! dead one.

use uuid::Uuid;

use super::{
    ClientId, DisplayName, MeetingId, error::DomainError, value_object::MAX_SESSION_ID_LEN,
};

/// Who is behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Authenticated account holder.
    User(Uuid),
    /// Guest joined through a public meeting link.
    Public(Uuid),
    /// No identity could be resolved.
    Anonymous,
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User(_))
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User(id) => Some(*id),
            _ => None,
        }
    }

    pub fn public_user_id(&self) -> Option<Uuid> {
        match self {
            Self::Public(id) => Some(*id),
            _ => None,
        }
    }
}

/// Identity as reported by the identity/session resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub display_name: Option<String>,
}

impl ResolvedIdentity {
    pub fn anonymous() -> Self {
        Self {
            identity: Identity::Anonymous,
            display_name: None,
        }
    }
}

/// Which identity signal a client id was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    User,
    PublicUser,
    Session,
    Random,
}

/// Derive the client id for a connection.
///
/// Priority: authenticated user, public user, meeting + session composite,
/// and only then a random id. The random fallback defeats duplicate
/// detection, so callers are expected to log it.
pub fn derive_client_id(
    meeting_id: &MeetingId,
    identity: &Identity,
    session_id: Option<&str>,
) -> Result<(ClientId, IdSource), DomainError> {
    let session_id = session_id.map(str::trim).filter(|s| !s.is_empty());
    if session_id.is_some_and(|s| s.chars().count() > MAX_SESSION_ID_LEN) {
        return Err(DomainError::TooLong {
            kind: "session id",
            max: MAX_SESSION_ID_LEN,
        });
    }
    let (raw, source) = match (identity, session_id) {
        (Identity::User(id), _) => (format!("user_{}", id), IdSource::User),
        (Identity::Public(id), _) => (format!("public_{}", id), IdSource::PublicUser),
        (Identity::Anonymous, Some(session)) => (
            format!("session_{}_{}", meeting_id.as_str(), session),
            IdSource::Session,
        ),
        (Identity::Anonymous, None) => (Uuid::new_v4().to_string(), IdSource::Random),
    };
    Ok((ClientId::new(raw)?, source))
}

/// Name used when the identity carries none.
///
/// Never yields an empty name or the literal "Anonymous User".
pub fn fallback_display_name(client_id: &ClientId) -> DisplayName {
    let id = client_id.as_str();
    let name = if let Some(rest) = id.strip_prefix("user_") {
        format!("User {}", take_chars(rest, 3))
    } else if let Some(rest) = id.strip_prefix("public_") {
        format!("Guest {}", take_chars(rest, 4))
    } else {
        format!("Participant {}", last_chars(id, 4))
    };
    DisplayName::generated(name)
}

/// Pick the display name for a connection from the resolver, the client's
/// own hint and finally the fallback.
pub fn choose_display_name(
    client_id: &ClientId,
    resolved: Option<&str>,
    hint: Option<&str>,
) -> DisplayName {
    resolved
        .into_iter()
        .chain(hint)
        .filter(|name| !name.trim().eq_ignore_ascii_case("anonymous user"))
        .find_map(|name| DisplayName::new(name.to_string()).ok())
        .unwrap_or_else(|| fallback_display_name(client_id))
}

fn take_chars(value: &str, count: usize) -> String {
    value.chars().take(count).collect()
}

fn last_chars(value: &str, count: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    chars[chars.len().saturating_sub(count)..].iter().collect()
}

/// Identity signals presented by a connecting client.
///
/// The resolver decides which of them to trust.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityHints {
    pub bearer_token: Option<String>,
    pub user_id: Option<String>,
    pub public_user_id: Option<String>,
    pub session_id: Option<String>,
    pub name: Option<String>,
}

/// Everything the router needs to know about who owns a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub id: ClientId,
    pub identity: Identity,
    pub display_name: DisplayName,
}

impl ClientProfile {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_authenticated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_object::{MAX_CLIENT_ID_LEN, MAX_MEETING_ID_LEN};

    fn meeting() -> MeetingId {
        MeetingId::new("m-1".to_string()).unwrap()
    }

    #[test]
    fn test_derive_client_id_prefers_authenticated_user() {
        // テスト項目: 認証ユーザーの ID が最優先で使われる
        // given (前提条件):
        let user = Uuid::new_v4();
        let identity = Identity::User(user);

        // when (操作):
        let (id, source) = derive_client_id(&meeting(), &identity, Some("sess")).unwrap();

        // then (期待する結果):
        assert_eq!(id.as_str(), format!("user_{}", user));
        assert_eq!(source, IdSource::User);
    }

    #[test]
    fn test_derive_client_id_uses_public_user() {
        // テスト項目: 公開ユーザーの場合 public_ プレフィックスの ID になる
        // given (前提条件):
        let guest = Uuid::new_v4();
        let identity = Identity::Public(guest);

        // when (操作):
        let (id, source) = derive_client_id(&meeting(), &identity, None).unwrap();

        // then (期待する結果):
        assert_eq!(id.as_str(), format!("public_{}", guest));
        assert_eq!(source, IdSource::PublicUser);
    }

    #[test]
    fn test_derive_client_id_uses_session_composite() {
        // テスト項目: ID が無い場合はミーティング ID とセッション ID の合成になる
        // given (前提条件):
        let identity = Identity::Anonymous;

        // when (操作):
        let (id, source) = derive_client_id(&meeting(), &identity, Some("abc123")).unwrap();

        // then (期待する結果):
        assert_eq!(id.as_str(), "session_m-1_abc123");
        assert_eq!(source, IdSource::Session);
    }

    #[test]
    fn test_derive_client_id_bounds_session_id() {
        // テスト項目: 最長の会議 ID と最長のセッション ID でも合成 ID は上限に収まり、
        // それより長いセッション ID は「session id」の長さエラーになる
        // given (前提条件):
        let longest_meeting = MeetingId::new("m".repeat(MAX_MEETING_ID_LEN)).unwrap();
        let longest_session = "s".repeat(MAX_SESSION_ID_LEN);
        let too_long_session = "s".repeat(MAX_SESSION_ID_LEN + 1);

        // when (操作):
        let fits = derive_client_id(&longest_meeting, &Identity::Anonymous, Some(&longest_session));
        let rejected = derive_client_id(&meeting(), &Identity::Anonymous, Some(&too_long_session));

        // then (期待する結果):
        let (id, source) = fits.unwrap();
        assert_eq!(id.as_str().chars().count(), MAX_CLIENT_ID_LEN);
        assert_eq!(source, IdSource::Session);
        assert_eq!(
            rejected,
            Err(DomainError::TooLong {
                kind: "session id",
                max: MAX_SESSION_ID_LEN,
            })
        );
    }

    #[test]
    fn test_derive_client_id_is_deterministic_across_reconnects() {
        // テスト項目: 同じユーザーの再接続では同じ ID が導出される
        // given (前提条件):
        let identity = Identity::User(Uuid::new_v4());

        // when (操作):
        let (first, _) = derive_client_id(&meeting(), &identity, None).unwrap();
        let (second, _) = derive_client_id(&meeting(), &identity, None).unwrap();

        // then (期待する結果):
        assert_eq!(first, second);
    }

    #[test]
    fn test_derive_client_id_falls_back_to_random() {
        // テスト項目: 識別情報が何も無い場合はランダムな ID になる
        // given (前提条件):
        let identity = Identity::Anonymous;

        // when (操作):
        let (first, source) = derive_client_id(&meeting(), &identity, Some("  ")).unwrap();
        let (second, _) = derive_client_id(&meeting(), &identity, None).unwrap();

        // then (期待する結果):
        assert_eq!(source, IdSource::Random);
        assert_ne!(first, second);
    }

    #[test]
    fn test_fallback_display_name_by_prefix() {
        // テスト項目: フォールバック名は ID のプレフィックスに応じて決まる
        // given (前提条件):
        let user = ClientId::new("user_abcdef".to_string()).unwrap();
        let guest = ClientId::new("public_1234abcd".to_string()).unwrap();
        let session = ClientId::new("session_m-1_xyz9876".to_string()).unwrap();

        // when (操作):
        let names = [
            fallback_display_name(&user),
            fallback_display_name(&guest),
            fallback_display_name(&session),
        ];

        // then (期待する結果):
        assert_eq!(names[0].as_str(), "User abc");
        assert_eq!(names[1].as_str(), "Guest 1234");
        assert_eq!(names[2].as_str(), "Participant 9876");
    }

    #[test]
    fn test_choose_display_name_skips_anonymous_user() {
        // テスト項目: "Anonymous User" という名前は使われずヒントかフォールバックになる
        // given (前提条件):
        let id = ClientId::new("public_1234abcd".to_string()).unwrap();

        // when (操作):
        let from_hint = choose_display_name(&id, Some("Anonymous User"), Some("Bob"));
        let fallback = choose_display_name(&id, Some("anonymous user"), None);

        // then (期待する結果):
        assert_eq!(from_hint.as_str(), "Bob");
        assert_eq!(fallback.as_str(), "Guest 1234");
    }
}
