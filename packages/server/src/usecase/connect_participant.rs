//! UseCase: 参加者接続処理
//!
//! 接続は 2 段階で処理します。
//!
//! 1. `authorize`: WebSocket のアップグレード前に、会議の存在確認と本人確認を行い、
//!    決定的なクライアント ID と表示名を決める
//! 2. `execute`: アップグレード後に Peer-State への参加、ハブへの登録、
//!    参加者の永続化（ベストエフォート）を行う
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - ConnectParticipantUseCase::authorize() / execute() メソッド
//! - クライアント ID の導出と、存在しない会議の拒否
//!
//! ### なぜこのテストが必要か
//! - 同じ本人の再接続が同じ ID になることが重複登録防止の前提
//! - 永続化の失敗で接続自体が失敗しないことを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：認証済みユーザーの接続
//! - エッジケース：本人確認の手掛かりがなくランダム ID になる
//! - 異常系：存在しない会議、定員超過、永続化の失敗

use std::sync::Arc;

use crate::domain::{
    ClientProfile, ConnectionToken, IdSource, IdentityHints, IdentityResolver, MeetingDirectory,
    MeetingId, OutboundSender, ParticipantRepository, PeerStoreError, SignalingHub,
    choose_display_name, derive_client_id,
};

use super::{error::ConnectError, peer_state::PeerStateService};

/// 本人確認が済み、アップグレードを待っている接続
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPlan {
    pub meeting_id: MeetingId,
    pub profile: ClientProfile,
}

/// ハブに登録済みの接続
///
/// セッションは退出・切断のときにこれを UseCase に返します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTicket {
    pub meeting_id: MeetingId,
    pub profile: ClientProfile,
    pub token: ConnectionToken,
}

/// 参加者接続のユースケース
pub struct ConnectParticipantUseCase {
    /// MeetingDirectory（会議の存在確認）
    meetings: Arc<dyn MeetingDirectory>,
    /// IdentityResolver（本人確認）
    identities: Arc<dyn IdentityResolver>,
    /// ParticipantRepository（参加者の永続化）
    participants: Arc<dyn ParticipantRepository>,
    /// SignalingHub（ハブへのハンドル）
    hub: Arc<dyn SignalingHub>,
    /// PeerStateService（Peer-State）
    peers: Arc<PeerStateService>,
}

impl ConnectParticipantUseCase {
    /// 新しい ConnectParticipantUseCase を作成
    pub fn new(
        meetings: Arc<dyn MeetingDirectory>,
        identities: Arc<dyn IdentityResolver>,
        participants: Arc<dyn ParticipantRepository>,
        hub: Arc<dyn SignalingHub>,
        peers: Arc<PeerStateService>,
    ) -> Self {
        Self {
            meetings,
            identities,
            participants,
            hub,
            peers,
        }
    }

    /// 接続を許可するか判定し、クライアント ID と表示名を決める
    ///
    /// # Arguments
    ///
    /// * `meeting_id` - 接続先の会議
    /// * `hints` - クライアントが提示した本人確認の手掛かり
    ///
    /// # Returns
    ///
    /// * `Ok(ConnectionPlan)` - 許可された接続
    /// * `Err(ConnectError::MeetingNotFound)` - 会議が存在しない
    pub async fn authorize(
        &self,
        meeting_id: MeetingId,
        hints: &IdentityHints,
    ) -> Result<ConnectionPlan, ConnectError> {
        // 1. 会議の存在確認
        let exists = self
            .meetings
            .meeting_exists(&meeting_id)
            .await
            .map_err(ConnectError::MeetingLookup)?;
        if !exists {
            return Err(ConnectError::MeetingNotFound(meeting_id.into_string()));
        }

        // 2. 本人確認
        let resolved = self.identities.resolve(hints).await;

        // 3. 決定的なクライアント ID の導出
        let (client_id, source) =
            derive_client_id(&meeting_id, &resolved.identity, hints.session_id.as_deref())
                .map_err(ConnectError::InvalidIdentity)?;
        if source == IdSource::Random {
            tracing::warn!(
                meeting_id = %meeting_id,
                client_id = %client_id,
                "No identity signal available, using a random client id; reconnects will not be deduplicated"
            );
        }

        // 4. 表示名
        let display_name = choose_display_name(
            &client_id,
            resolved.display_name.as_deref(),
            hints.name.as_deref(),
        );

        Ok(ConnectionPlan {
            meeting_id,
            profile: ClientProfile {
                id: client_id,
                identity: resolved.identity,
                display_name,
            },
        })
    }

    /// 接続を登録する
    ///
    /// # Arguments
    ///
    /// * `plan` - `authorize` が返した接続
    /// * `outbound` - この接続の送信キュー
    ///
    /// # Returns
    ///
    /// * `Ok(ConnectionTicket)` - 登録済みの接続
    /// * `Err(ConnectError::RoomFull)` - ルームが定員に達している
    /// * `Err(ConnectError::Hub)` - ハブが停止している
    pub async fn execute(
        &self,
        plan: ConnectionPlan,
        outbound: OutboundSender,
    ) -> Result<ConnectionTicket, ConnectError> {
        let ConnectionPlan {
            meeting_id,
            profile,
        } = plan;

        // 1. Peer-State に参加（定員超過のみ接続を拒否する）
        match self.peers.join(&meeting_id, &profile).await {
            Ok(_) => {}
            Err(PeerStoreError::RoomFull { meeting_id, max }) => {
                return Err(ConnectError::RoomFull { meeting_id, max });
            }
            Err(err) => {
                tracing::warn!(
                    meeting_id = %meeting_id,
                    client_id = %profile.id,
                    error = %err,
                    "Failed to record peer join"
                );
            }
        }

        // 2. ハブに登録
        let token = match self
            .hub
            .register(meeting_id.clone(), profile.clone(), outbound)
            .await
        {
            Ok(token) => token,
            Err(err) => {
                let _ = self.peers.leave(&meeting_id, &profile.id).await;
                return Err(err.into());
            }
        };

        // 3. 参加者をアクティブにする（ベストエフォート）
        if let Err(err) = self
            .participants
            .set_participant_active(&meeting_id, &profile.identity, true)
            .await
        {
            tracing::warn!(
                meeting_id = %meeting_id,
                client_id = %profile.id,
                error = %err,
                "Failed to mark participant active"
            );
        }

        Ok(ConnectionTicket {
            meeting_id,
            profile,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use kaigi_shared::time::FixedClock;
    use mockall::predicate::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        domain::{
            ClientId, HubError, Identity, MockIdentityResolver, MockMeetingDirectory,
            MockParticipantRepository, MockSignalingHub, PersistenceError, ResolvedIdentity,
        },
        infrastructure::peer_store::InMemoryPeerStore,
    };

    fn meeting() -> MeetingId {
        MeetingId::new("m-1".to_string()).unwrap()
    }

    fn user_id() -> Uuid {
        Uuid::parse_str("6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b").unwrap()
    }

    fn meetings_exist(exists: bool) -> MockMeetingDirectory {
        let mut meetings = MockMeetingDirectory::new();
        meetings
            .expect_meeting_exists()
            .returning(move |_| Ok(exists));
        meetings
    }

    fn resolver(identity: Identity, name: Option<&str>) -> MockIdentityResolver {
        let name = name.map(str::to_string);
        let mut resolver = MockIdentityResolver::new();
        resolver.expect_resolve().returning(move |_| ResolvedIdentity {
            identity,
            display_name: name.clone(),
        });
        resolver
    }

    fn peers(max: usize) -> Arc<PeerStateService> {
        Arc::new(PeerStateService::new(
            Arc::new(InMemoryPeerStore::new()),
            Arc::new(FixedClock::new(1_700_000_000_000)),
            max,
        ))
    }

    fn usecase(
        meetings: MockMeetingDirectory,
        identities: MockIdentityResolver,
        participants: MockParticipantRepository,
        hub: MockSignalingHub,
        peers: Arc<PeerStateService>,
    ) -> ConnectParticipantUseCase {
        ConnectParticipantUseCase::new(
            Arc::new(meetings),
            Arc::new(identities),
            Arc::new(participants),
            Arc::new(hub),
            peers,
        )
    }

    #[tokio::test]
    async fn test_authorize_derives_user_id() {
        // テスト項目: 認証済みユーザーは user_<uuid> の ID と解決済みの名前になる
        // given (前提条件):
        let usecase = usecase(
            meetings_exist(true),
            resolver(Identity::User(user_id()), Some("Alice")),
            MockParticipantRepository::new(),
            MockSignalingHub::new(),
            peers(10),
        );

        // when (操作):
        let plan = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(plan.profile.id.as_str(), format!("user_{}", user_id()));
        assert_eq!(plan.profile.display_name.as_str(), "Alice");
        assert!(plan.profile.is_authenticated());
    }

    #[tokio::test]
    async fn test_authorize_is_deterministic_across_reconnects() {
        // テスト項目: 同じ本人の 2 回の接続は同じクライアント ID になる
        // given (前提条件):
        let usecase = usecase(
            meetings_exist(true),
            resolver(Identity::Public(user_id()), None),
            MockParticipantRepository::new(),
            MockSignalingHub::new(),
            peers(10),
        );

        // when (操作):
        let first = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();
        let second = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(first.profile.id, second.profile.id);
        assert!(first.profile.display_name.as_str().starts_with("Guest "));
    }

    #[tokio::test]
    async fn test_authorize_uses_session_composite_for_anonymous() {
        // テスト項目: 匿名でもセッション ID があれば session_<meeting>_<session> になる
        // given (前提条件):
        let usecase = usecase(
            meetings_exist(true),
            resolver(Identity::Anonymous, None),
            MockParticipantRepository::new(),
            MockSignalingHub::new(),
            peers(10),
        );
        let hints = IdentityHints {
            session_id: Some("tab-7".to_string()),
            name: Some("Visitor".to_string()),
            ..IdentityHints::default()
        };

        // when (操作):
        let plan = usecase.authorize(meeting(), &hints).await.unwrap();

        // then (期待する結果):
        assert_eq!(plan.profile.id.as_str(), "session_m-1_tab-7");
        assert_eq!(plan.profile.display_name.as_str(), "Visitor");
    }

    #[tokio::test]
    async fn test_authorize_falls_back_to_random_id() {
        // テスト項目: 手掛かりがまったくなければランダム ID で接続を許可する
        // given (前提条件):
        let usecase = usecase(
            meetings_exist(true),
            resolver(Identity::Anonymous, None),
            MockParticipantRepository::new(),
            MockSignalingHub::new(),
            peers(10),
        );

        // when (操作):
        let first = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();
        let second = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();

        // then (期待する結果):
        assert_ne!(first.profile.id, second.profile.id);
        assert_ne!(first.profile.display_name.as_str(), "Anonymous User");
    }

    #[tokio::test]
    async fn test_authorize_rejects_unknown_meeting() {
        // テスト項目: 存在しない会議への接続は MeetingNotFound で拒否される
        // given (前提条件):
        let mut identities = MockIdentityResolver::new();
        identities.expect_resolve().never();
        let usecase = usecase(
            meetings_exist(false),
            identities,
            MockParticipantRepository::new(),
            MockSignalingHub::new(),
            peers(10),
        );

        // when (操作):
        let result = usecase.authorize(meeting(), &IdentityHints::default()).await;

        // then (期待する結果):
        assert_eq!(result, Err(ConnectError::MeetingNotFound("m-1".to_string())));
    }

    #[tokio::test]
    async fn test_execute_registers_and_marks_active() {
        // テスト項目: 登録に成功するとトークンが返り、参加者がアクティブになる
        // given (前提条件):
        let identity = Identity::User(user_id());
        let mut hub = MockSignalingHub::new();
        hub.expect_register()
            .times(1)
            .returning(|_, _, _| Ok(ConnectionToken::new(7)));
        let mut participants = MockParticipantRepository::new();
        participants
            .expect_set_participant_active()
            .with(eq(meeting()), eq(identity), eq(true))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let peers = peers(10);
        let usecase = usecase(
            meetings_exist(true),
            resolver(identity, Some("Alice")),
            participants,
            hub,
            peers.clone(),
        );
        let plan = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();
        let (tx, _rx) = mpsc::channel(4);

        // when (操作):
        let ticket = usecase.execute(plan.clone(), tx).await.unwrap();

        // then (期待する結果):
        assert_eq!(ticket.token, ConnectionToken::new(7));
        assert_eq!(ticket.profile, plan.profile);
        assert!(peers.get(&meeting(), &plan.profile.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_survives_persistence_failure() {
        // テスト項目: 参加者の永続化に失敗しても接続は成功する
        // given (前提条件):
        let mut hub = MockSignalingHub::new();
        hub.expect_register()
            .returning(|_, _, _| Ok(ConnectionToken::new(1)));
        let mut participants = MockParticipantRepository::new();
        participants
            .expect_set_participant_active()
            .returning(|_, _, _| Err(PersistenceError::Unavailable("db down".to_string())));
        let usecase = usecase(
            meetings_exist(true),
            resolver(Identity::User(user_id()), None),
            participants,
            hub,
            peers(10),
        );
        let plan = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();
        let (tx, _rx) = mpsc::channel(4);

        // when (操作):
        let result = usecase.execute(plan, tx).await;

        // then (期待する結果):
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_execute_rejects_full_room_before_registering() {
        // テスト項目: 定員超過ならハブに登録せず RoomFull を返す
        // given (前提条件):
        let peers = peers(1);
        let occupant = ClientProfile {
            id: ClientId::new("occupant".to_string()).unwrap(),
            identity: Identity::Anonymous,
            display_name: crate::domain::DisplayName::new("Occupant".to_string()).unwrap(),
        };
        peers.join(&meeting(), &occupant).await.unwrap();
        let mut hub = MockSignalingHub::new();
        hub.expect_register().never();
        let usecase = usecase(
            meetings_exist(true),
            resolver(Identity::User(user_id()), None),
            MockParticipantRepository::new(),
            hub,
            peers,
        );
        let plan = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();
        let (tx, _rx) = mpsc::channel(4);

        // when (操作):
        let result = usecase.execute(plan, tx).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(ConnectError::RoomFull {
                meeting_id: "m-1".to_string(),
                max: 1
            })
        );
    }

    #[tokio::test]
    async fn test_execute_reports_stopped_hub() {
        // テスト項目: ハブが停止していれば Hub エラーを返す
        // given (前提条件):
        let mut hub = MockSignalingHub::new();
        hub.expect_register()
            .returning(|_, _, _| Err(HubError::Stopped));
        let mut participants = MockParticipantRepository::new();
        participants.expect_set_participant_active().never();
        let usecase = usecase(
            meetings_exist(true),
            resolver(Identity::User(user_id()), None),
            participants,
            hub,
            peers(10),
        );
        let plan = usecase
            .authorize(meeting(), &IdentityHints::default())
            .await
            .unwrap();
        let (tx, _rx) = mpsc::channel(4);

        // when (操作):
        let result = usecase.execute(plan, tx).await;

        // then (期待する結果):
        assert_eq!(result, Err(ConnectError::Hub(HubError::Stopped)));
    }
}
