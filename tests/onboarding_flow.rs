//! End-to-end onboarding scenarios against the in-memory gateway.
//!
//! Each test builds the community catalog over an `InMemoryGateway`, an
//! in-memory libSQL store and stub identity/tagging services, then drives
//! the sequencer the way Discord events would.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use welcome_bot::config::{DEFAULT_HELP_CONTACT, OnboardingConfig, RoleConfig, WatchdogConfig};
use welcome_bot::error::TaggingError;
use welcome_bot::gateway::{
    ChannelId, ChannelRef, ChatGateway, InMemoryGateway, MemberId, MemberProfile, RoleId,
};
use welcome_bot::identity::{Account, AccountLinker, InMemoryIdentityStore};
use welcome_bot::marketing::{TagOutcome, TaggingService};
use welcome_bot::onboarding::catalog::{PRO_NOTICE, WELCOME_DM, idle_warning};
use welcome_bot::onboarding::history::format_error;
use welcome_bot::onboarding::{
    IncomingReaction, IncomingText, OnboardingDeps, OnboardingSession, SessionStatus, StepCatalog,
    StepSequencer, Watchdog, recover,
};
use welcome_bot::store::{Database, LibSqlBackend};

const BOT: MemberId = MemberId(1);
const ALICE: MemberId = MemberId(123);

const ROLES: RoleConfig = RoleConfig {
    regular_member: RoleId(100),
    pro: RoleId(200),
    introductions: RoleId(300),
};

/// Maximum time a background poll may take to land.
const POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// Records every email it is asked to tag.
#[derive(Default)]
struct RecordingTagger {
    emails: Mutex<Vec<String>>,
}

#[async_trait]
impl TaggingService for RecordingTagger {
    async fn tag_member(&self, email: &str) -> Result<TagOutcome, TaggingError> {
        self.emails.lock().await.push(email.to_string());
        Ok(TagOutcome::Tagged)
    }
}

struct Harness {
    gateway: Arc<InMemoryGateway>,
    store: Arc<LibSqlBackend>,
    identity: Arc<InMemoryIdentityStore>,
    tagger: Arc<RecordingTagger>,
    catalog: Arc<StepCatalog>,
    sequencer: Arc<StepSequencer>,
    watchdog: Watchdog,
}

async fn harness() -> Harness {
    let gateway = Arc::new(InMemoryGateway::new(BOT));
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let identity = Arc::new(InMemoryIdentityStore::new());
    let tagger = Arc::new(RecordingTagger::default());

    let mut config = OnboardingConfig::with_roles(ROLES);
    config.poll_interval = Duration::from_millis(10);
    let catalog = Arc::new(StepCatalog::community(&config));

    let deps = OnboardingDeps {
        gateway: gateway.clone(),
        store: store.clone(),
        linker: Arc::new(AccountLinker::new(
            identity.clone(),
            config.poll_interval,
        )),
        tagging: tagger.clone(),
    };
    let sequencer = StepSequencer::new(
        deps,
        Arc::clone(&catalog),
        config,
        CancellationToken::new(),
    );
    let watchdog = Watchdog::new(Arc::clone(&sequencer), WatchdogConfig::default());

    Harness {
        gateway,
        store,
        identity,
        tagger,
        catalog,
        sequencer,
        watchdog,
    }
}

impl Harness {
    async fn join(&self, has_avatar: bool) -> ChannelRef {
        let profile = MemberProfile {
            id: ALICE,
            username: "alice".into(),
            has_avatar,
        };
        self.gateway.add_member(profile.clone());
        self.sequencer.start(&profile).await.unwrap()
    }

    async fn say(&self, channel: &ChannelRef, content: &str) {
        self.gateway.post_as(channel.id, ALICE, content);
        self.sequencer
            .handle_message(&IncomingText {
                channel: channel.clone(),
                author: ALICE,
                author_is_bot: false,
                content: content.to_string(),
            })
            .await
            .unwrap();
    }

    /// Click `emoji` on the current question.
    async fn react(&self, channel: &ChannelRef, emoji: &str) {
        let session = self.store.get_session(ALICE).await.unwrap().unwrap();
        self.sequencer
            .handle_reaction(&IncomingReaction {
                channel: channel.clone(),
                message: session.question.unwrap().message_id,
                user: ALICE,
                emoji: emoji.to_string(),
            })
            .await
            .unwrap();
    }

    async fn step_index(&self) -> usize {
        self.store
            .get_session(ALICE)
            .await
            .unwrap()
            .unwrap()
            .step_index
    }

    fn question(&self, index: usize) -> String {
        self.catalog.get(index).unwrap().question.clone()
    }

    fn help(&self, index: usize) -> String {
        self.catalog.get(index).unwrap().help.clone().unwrap()
    }

    fn last_bot_message(&self, channel: &ChannelRef) -> String {
        self.gateway
            .bot_messages(channel.id)
            .pop()
            .unwrap_or_default()
    }

    /// Wait until the session reaches `index`, for steps finished by a poll.
    async fn wait_for_step(&self, index: usize) {
        tokio::time::timeout(POLL_TIMEOUT, async {
            while self.step_index().await != index {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session never reached step {index}"));
    }

    async fn wait_for_status(&self, status: SessionStatus) {
        tokio::time::timeout(POLL_TIMEOUT, async {
            loop {
                let session = self.store.get_session(ALICE).await.unwrap().unwrap();
                if session.status == status {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session never became {status}"));
    }

    async fn link_account(&self, active_subscription: bool) {
        self.identity
            .link(
                ALICE,
                Account {
                    id: "scrimba-1".into(),
                    email: Some("alice@example.com".into()),
                    active_subscription,
                },
            )
            .await;
    }
}

// ── Joining and answering ───────────────────────────────────────────

#[tokio::test]
async fn join_creates_named_channel_and_asks_first_step() {
    let h = harness().await;
    let channel = h.join(false).await;

    assert_eq!(channel.name, "👋welcome-alice_123");
    assert_eq!(h.gateway.bot_messages(channel.id), vec![h.question(0)]);

    let session = h.store.get_session(ALICE).await.unwrap().unwrap();
    assert_eq!(session.channel_id, channel.id);
    assert_eq!(session.step_index, 0);
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.question.is_some());
}

#[tokio::test]
async fn name_with_space_is_rejected_and_step_unchanged() {
    let h = harness().await;
    let channel = h.join(false).await;

    h.say(&channel, "Al Ice").await;

    let reply = h.last_bot_message(&channel);
    assert!(reply.starts_with("❌ <@123>, "), "{reply}");
    assert!(reply.contains("Al Ice"));
    assert_eq!(h.step_index().await, 0);
    assert_eq!(h.gateway.nickname_of(ALICE), None);

    // The question is still the one being answered.
    h.say(&channel, "Alice").await;
    assert_eq!(h.gateway.nickname_of(ALICE).as_deref(), Some("Alice"));
}

#[tokio::test]
async fn first_name_sets_nickname_and_asks_for_avatar() {
    let h = harness().await;
    let channel = h.join(false).await;

    h.say(&channel, "Alice").await;

    assert_eq!(h.gateway.nickname_of(ALICE).as_deref(), Some("Alice"));
    let messages = h.gateway.bot_messages(channel.id);
    assert_eq!(
        messages,
        vec![
            h.question(0),
            "ℹ️ Nice to meet you!".to_string(),
            h.question(1)
        ]
    );
    assert_eq!(h.step_index().await, 1);
    // The avatar step waits on a poll with input disabled.
    assert!(!h.gateway.can_write(channel.id, ALICE));
}

#[tokio::test]
async fn existing_avatar_skips_straight_to_account_link() {
    let h = harness().await;
    let channel = h.join(true).await;

    h.say(&channel, "Alice").await;

    assert_eq!(h.last_bot_message(&channel), h.question(2));
    assert_eq!(h.step_index().await, 2);
    assert!(!h.gateway.bot_messages(channel.id).contains(&h.question(1)));
}

#[tokio::test]
async fn duplicate_answer_applies_to_the_advanced_step() {
    let h = harness().await;
    let channel = h.join(false).await;

    let first = h.say(&channel, "Alice");
    let second = h.say(&channel, "Alice");
    tokio::join!(first, second);

    let successes = h
        .gateway
        .bot_messages(channel.id)
        .into_iter()
        .filter(|m| m == "ℹ️ Nice to meet you!")
        .count();
    assert_eq!(successes, 1);
    assert_eq!(h.step_index().await, 1);
}

#[tokio::test]
async fn help_keyword_posts_step_help() {
    let h = harness().await;
    let channel = h.join(false).await;

    h.say(&channel, "HELP").await;

    assert!(h.last_bot_message(&channel).ends_with(&h.help(0)));
    assert_eq!(h.step_index().await, 0);
    assert_eq!(h.gateway.nickname_of(ALICE), None);
}

// ── Polls ───────────────────────────────────────────────────────────

#[tokio::test]
async fn polls_advance_when_conditions_hold() {
    let h = harness().await;
    let channel = h.join(false).await;
    h.say(&channel, "Alice").await;
    assert_eq!(h.step_index().await, 1);

    h.gateway.set_avatar(ALICE, true);
    h.wait_for_step(2).await;
    assert_eq!(h.last_bot_message(&channel), h.question(2));

    h.link_account(true).await;
    h.wait_for_step(3).await;

    let messages = h.gateway.bot_messages(channel.id);
    let pro = messages.iter().position(|m| m == PRO_NOTICE).unwrap();
    let fantastik = messages.iter().position(|m| m == "ℹ️ Fantastik!").unwrap();
    assert!(pro < fantastik);
    assert_eq!(messages.last().unwrap(), &h.question(3));
}

#[tokio::test]
async fn member_leaving_stops_the_poll() {
    let h = harness().await;
    let channel = h.join(false).await;
    h.say(&channel, "Alice").await;
    assert_eq!(h.sequencer.registry().active_polls().await, 1);

    h.gateway.remove_member(ALICE);
    h.sequencer.member_left(ALICE).await.unwrap();

    assert!(h.gateway.is_deleted(channel.id));
    assert_eq!(h.sequencer.registry().active_polls().await, 0);
    let session = h.store.get_session(ALICE).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Abandoned);
}

// ── Reactions and completion ────────────────────────────────────────

#[tokio::test]
async fn full_flow_for_pro_member() {
    let h = harness().await;
    h.link_account(true).await;
    let channel = h.join(true).await;

    h.say(&channel, "Alice").await;
    // Avatar and account steps are skipped.
    assert_eq!(h.step_index().await, 3);
    assert!(!h.gateway.can_write(channel.id, ALICE));
    let question = h.store.get_session(ALICE).await.unwrap().unwrap().question.unwrap();
    assert!(
        h.gateway
            .reactions()
            .contains(&(channel.id, question.message_id, "✅".to_string()))
    );

    // A different emoji is ignored.
    h.react(&channel, "👍").await;
    assert_eq!(h.step_index().await, 3);

    h.react(&channel, "✅").await;
    assert_eq!(h.step_index().await, 4);
    assert!(h.gateway.roles_of(ALICE).contains(&ROLES.introductions));
    assert!(h.gateway.bot_messages(channel.id).contains(&"ℹ️ Great!".to_string()));

    h.react(&channel, "✅").await;

    let roles = h.gateway.roles_of(ALICE);
    assert!(roles.contains(&ROLES.pro));
    assert!(roles.contains(&ROLES.regular_member));
    assert!(h.gateway.is_deleted(channel.id));
    assert_eq!(h.gateway.direct_messages(ALICE), vec![WELCOME_DM.to_string()]);
    assert_eq!(*h.tagger.emails.lock().await, vec!["alice@example.com".to_string()]);
    h.wait_for_status(SessionStatus::Completed).await;
}

#[tokio::test]
async fn completion_without_subscription_grants_regular_role_only() {
    let h = harness().await;
    h.link_account(false).await;
    let channel = h.join(true).await;

    h.say(&channel, "Alice").await;
    h.react(&channel, "✅").await;
    h.react(&channel, "✅").await;

    let roles = h.gateway.roles_of(ALICE);
    assert!(!roles.contains(&ROLES.pro));
    assert!(roles.contains(&ROLES.regular_member));
    assert!(h.gateway.is_deleted(channel.id));
    assert_eq!(h.gateway.direct_messages(ALICE).len(), 1);
}

#[tokio::test]
async fn completion_survives_role_failures() {
    let h = harness().await;
    h.link_account(true).await;
    let channel = h.join(true).await;
    h.say(&channel, "Alice").await;
    h.react(&channel, "✅").await;

    h.gateway.fail_role_grants(true);
    h.react(&channel, "✅").await;

    assert_eq!(h.gateway.roles_of(ALICE), vec![ROLES.introductions]);
    assert!(h.gateway.is_deleted(channel.id));
    assert_eq!(h.gateway.direct_messages(ALICE).len(), 1);
}

// ── Watchdog ────────────────────────────────────────────────────────

#[tokio::test]
async fn help_is_offered_once_after_thirty_seconds() {
    let h = harness().await;
    let channel = h.join(false).await;
    let expected = format_error(ALICE, &h.help(0));

    h.gateway.advance_clock(ChronoDuration::seconds(31));
    let report = h.watchdog.sweep_at(h.gateway.now()).await;
    assert_eq!(report.help_offered, 1);
    assert_eq!(h.last_bot_message(&channel), expected);

    h.gateway.advance_clock(ChronoDuration::seconds(1));
    let report = h.watchdog.sweep_at(h.gateway.now()).await;
    assert_eq!(report.help_offered, 0);

    let offers = h
        .gateway
        .bot_messages(channel.id)
        .into_iter()
        .filter(|m| *m == expected)
        .count();
    assert_eq!(offers, 1);
}

#[tokio::test]
async fn nothing_happens_before_thirty_seconds() {
    let h = harness().await;
    let channel = h.join(false).await;

    h.gateway.advance_clock(ChronoDuration::seconds(29));
    let report = h.watchdog.sweep_at(h.gateway.now()).await;

    assert_eq!(report.inspected, 1);
    assert_eq!(report.help_offered, 0);
    assert_eq!(h.gateway.bot_messages(channel.id).len(), 1);
}

#[tokio::test]
async fn warning_is_posted_once() {
    let h = harness().await;
    let channel = h.join(false).await;
    let warning = format_error(ALICE, &idle_warning(MemberId(DEFAULT_HELP_CONTACT)));

    h.gateway.advance_clock(ChronoDuration::seconds(361));
    assert_eq!(h.watchdog.sweep_at(h.gateway.now()).await.warned, 1);
    h.gateway.advance_clock(ChronoDuration::seconds(5));
    assert_eq!(h.watchdog.sweep_at(h.gateway.now()).await.warned, 0);

    let warnings = h
        .gateway
        .bot_messages(channel.id)
        .into_iter()
        .filter(|m| *m == warning)
        .count();
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn stalled_member_is_kicked_and_channel_removed() {
    let h = harness().await;
    let channel = h.join(false).await;

    h.gateway.advance_clock(ChronoDuration::seconds(541));
    let report = h.watchdog.sweep_at(h.gateway.now()).await;
    assert_eq!(report.kicked, vec![ALICE]);
    assert_eq!(h.gateway.kicked(), vec![ALICE]);

    // The platform reports the removal.
    h.sequencer.member_left(ALICE).await.unwrap();
    assert!(h.gateway.is_deleted(channel.id));

    let report = h.watchdog.sweep_at(h.gateway.now()).await;
    assert_eq!(report.inspected, 0);
}

#[tokio::test]
async fn answering_resets_the_clock() {
    let h = harness().await;
    let channel = h.join(true).await;

    h.gateway.advance_clock(ChronoDuration::seconds(300));
    h.say(&channel, "Alice").await;
    h.gateway.advance_clock(ChronoDuration::seconds(100));

    let report = h.watchdog.sweep_at(h.gateway.now()).await;
    assert_eq!(report.warned, 0);
    assert_eq!(report.help_offered, 1);
    assert_eq!(
        h.last_bot_message(&channel),
        format_error(ALICE, &h.help(2))
    );
}

// ── History fallback and recovery ───────────────────────────────────

#[tokio::test]
async fn locate_reads_step_from_history_and_backfills() {
    let h = harness().await;
    for k in 0..h.catalog.len() {
        let member = MemberId(500 + k as u64);
        let channel = h
            .gateway
            .add_channel(&format!("👋welcome-member_{member}"));
        h.gateway.post_as(channel.id, BOT, &h.question(k));

        let current = h
            .sequencer
            .locate_current_step(member, channel.id)
            .await
            .unwrap();
        assert_eq!(current.index, k);

        let session = h.store.get_session(member).await.unwrap().unwrap();
        assert_eq!(session.step_index, k);
        assert_eq!(session.channel_id, channel.id);
    }
}

#[tokio::test]
async fn edited_question_is_not_located() {
    let h = harness().await;
    let channel = h.gateway.add_channel("👋welcome-alice_123");
    h.gateway
        .post_as(channel.id, BOT, "What is your name? (old wording)");

    let result = h.sequencer.locate_current_step(ALICE, channel.id).await;
    assert!(result.is_err());
    assert!(h.store.get_session(ALICE).await.unwrap().is_none());
}

#[tokio::test]
async fn recovery_cleans_orphans_and_rearms_polls() {
    let h = harness().await;

    // A member who left while the bot was offline.
    let orphan = h.gateway.add_channel("👋welcome-bob_777");
    h.gateway.post_as(orphan.id, BOT, &h.question(0));

    // Alice was on the avatar step with no session record.
    h.gateway.add_member(MemberProfile {
        id: ALICE,
        username: "alice".into(),
        has_avatar: false,
    });
    let channel = h.gateway.add_channel("👋welcome-alice_123");
    h.gateway.post_as(channel.id, BOT, &h.question(1));

    // A session whose channel was deleted by hand.
    let ghost = MemberId(888);
    h.store
        .upsert_session(&OnboardingSession::new(ghost, ChannelId(4242)))
        .await
        .unwrap();

    let report = recover(&h.sequencer).await.unwrap();
    assert_eq!(report.channels_seen, 2);
    assert_eq!(report.orphans_removed, 1);
    assert_eq!(report.steps_resumed, 1);
    assert_eq!(report.sessions_abandoned, 1);
    assert!(h.gateway.is_deleted(orphan.id));

    // The re-armed poll finishes the avatar step.
    h.gateway.set_avatar(ALICE, true);
    h.wait_for_step(2).await;
    assert_eq!(h.last_bot_message(&channel), h.question(2));

    let ghost_session = h.store.get_session(ghost).await.unwrap().unwrap();
    assert_eq!(ghost_session.status, SessionStatus::Abandoned);
}

#[tokio::test]
async fn messages_outside_onboarding_channels_are_ignored() {
    let h = harness().await;
    h.join(false).await;
    let general = h.gateway.add_channel("general");

    h.sequencer
        .handle_message(&IncomingText {
            channel: general,
            author: ALICE,
            author_is_bot: false,
            content: "Alice".into(),
        })
        .await
        .unwrap();

    assert_eq!(h.gateway.nickname_of(ALICE), None);
    assert_eq!(h.step_index().await, 0);
    assert_eq!(h.gateway.bot_id(), BOT);
}
