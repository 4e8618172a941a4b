//! Static Identity Resolver 実装
//!
//! 設定で与えたベアラートークンの一覧から本人を解決します。
//! `trust_hints` が有効な場合は、クエリの `userId` / `publicUserId` もそのまま信用します
//! （開発・テスト用）。

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Identity, IdentityHints, IdentityResolver, ResolvedIdentity};

#[derive(Debug, Clone, Default)]
pub struct StaticIdentityResolver {
    tokens: HashMap<String, ResolvedIdentity>,
    trust_hints: bool,
}

impl StaticIdentityResolver {
    pub fn new(tokens: HashMap<String, ResolvedIdentity>, trust_hints: bool) -> Self {
        Self {
            tokens,
            trust_hints,
        }
    }

    fn from_hints(hints: &IdentityHints) -> Option<Identity> {
        let parse = |value: &Option<String>| {
            value
                .as_deref()
                .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        };
        parse(&hints.user_id)
            .map(Identity::User)
            .or_else(|| parse(&hints.public_user_id).map(Identity::Public))
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, hints: &IdentityHints) -> ResolvedIdentity {
        if let Some(resolved) = hints
            .bearer_token
            .as_deref()
            .and_then(|token| self.tokens.get(token))
        {
            return resolved.clone();
        }
        if self.trust_hints
            && let Some(identity) = Self::from_hints(hints)
        {
            return ResolvedIdentity {
                identity,
                display_name: None,
            };
        }
        ResolvedIdentity::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bearer_token_wins_over_hints() {
        // テスト項目: 既知のベアラートークンはクエリのヒントより優先される
        // given (前提条件):
        let user_id = Uuid::new_v4();
        let tokens = HashMap::from([(
            "secret".to_string(),
            ResolvedIdentity {
                identity: Identity::User(user_id),
                display_name: Some("Alice".to_string()),
            },
        )]);
        let resolver = StaticIdentityResolver::new(tokens, true);
        let hints = IdentityHints {
            bearer_token: Some("secret".to_string()),
            public_user_id: Some(Uuid::new_v4().to_string()),
            ..IdentityHints::default()
        };

        // when (操作):
        let resolved = resolver.resolve(&hints).await;

        // then (期待する結果):
        assert_eq!(resolved.identity, Identity::User(user_id));
        assert_eq!(resolved.display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_hints_are_ignored_unless_trusted() {
        // テスト項目: trust_hints が無効ならクエリの userId は使われない
        // given (前提条件):
        let user_id = Uuid::new_v4();
        let hints = IdentityHints {
            user_id: Some(user_id.to_string()),
            ..IdentityHints::default()
        };

        // when (操作):
        let untrusted = StaticIdentityResolver::new(HashMap::new(), false)
            .resolve(&hints)
            .await;
        let trusted = StaticIdentityResolver::new(HashMap::new(), true)
            .resolve(&hints)
            .await;

        // then (期待する結果):
        assert_eq!(untrusted, ResolvedIdentity::anonymous());
        assert_eq!(trusted.identity, Identity::User(user_id));
    }

    #[tokio::test]
    async fn test_invalid_uuid_hint_falls_back_to_public_or_anonymous() {
        // テスト項目: 壊れた userId は無視され、publicUserId が使われる
        // given (前提条件):
        let public_id = Uuid::new_v4();
        let hints = IdentityHints {
            user_id: Some("not-a-uuid".to_string()),
            public_user_id: Some(public_id.to_string()),
            ..IdentityHints::default()
        };
        let resolver = StaticIdentityResolver::new(HashMap::new(), true);

        // when (操作):
        let resolved = resolver.resolve(&hints).await;

        // then (期待する結果):
        assert_eq!(resolved.identity, Identity::Public(public_id));
    }
}
