//! Step sequencer — moves a member through the catalog.
//!
//! Every entry point that touches a session holds that member's lock from
//! `SessionRegistry` and re-reads the current step after acquiring it.
//! Poll tasks wait outside the lock and re-check the step before resuming.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OnboardingConfig;
use crate::error::{GatewayError, OnboardingError, Result};
use crate::gateway::{
    ChannelId, ChannelRef, ChatGateway, HistoryMessage, MemberId, MemberProfile, MessageId,
    OutgoingMessage,
};
use crate::identity::{Account, AccountLinker};
use crate::marketing::TaggingService;
use crate::poll::poll_until;
use crate::store::Database;

use super::catalog::{PRO_NOTICE, StepCatalog};
use super::completion::CompletionHandler;
use super::history::{derive_current_step, format_error, format_info};
use super::registry::SessionRegistry;
use super::session::{
    OnboardingSession, QuestionRef, SessionStatus, channel_name, member_id_from_channel_name,
};
use super::step::{AnswerAction, OnboardingStep, PollCondition, SkipRule, StepKind};

/// Collaborators the onboarding flow calls out to.
#[derive(Clone)]
pub struct OnboardingDeps {
    pub gateway: Arc<dyn ChatGateway>,
    pub store: Arc<dyn Database>,
    pub linker: Arc<AccountLinker>,
    pub tagging: Arc<dyn TaggingService>,
}

/// The step a member is on and the message that asked it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentStep {
    pub index: usize,
    pub question: QuestionRef,
}

/// A text message posted in some channel.
#[derive(Debug, Clone)]
pub struct IncomingText {
    pub channel: ChannelRef,
    pub author: MemberId,
    pub author_is_bot: bool,
    pub content: String,
}

/// A reaction added to a message.
#[derive(Debug, Clone)]
pub struct IncomingReaction {
    pub channel: ChannelRef,
    pub message: MessageId,
    pub user: MemberId,
    /// Unicode emoji, or the custom emoji's name.
    pub emoji: String,
}

pub struct StepSequencer {
    deps: OnboardingDeps,
    catalog: Arc<StepCatalog>,
    config: OnboardingConfig,
    registry: Arc<SessionRegistry>,
    completion: CompletionHandler,
}

impl StepSequencer {
    pub fn new(
        deps: OnboardingDeps,
        catalog: Arc<StepCatalog>,
        config: OnboardingConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let completion = CompletionHandler::new(
            Arc::clone(&deps.gateway),
            Arc::clone(&deps.store),
            Arc::clone(&deps.linker),
            Arc::clone(&deps.tagging),
            config.roles.clone(),
        );
        Arc::new(Self {
            deps,
            catalog,
            config,
            registry: Arc::new(SessionRegistry::new(shutdown)),
            completion,
        })
    }

    pub fn deps(&self) -> &OnboardingDeps {
        &self.deps
    }

    pub fn config(&self) -> &OnboardingConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Owner of an onboarding channel, from its name.
    pub fn owner_of(&self, channel_name: &str) -> Option<MemberId> {
        member_id_from_channel_name(&self.config.channel_prefix, channel_name)
    }

    pub fn step(&self, index: usize) -> Result<&OnboardingStep> {
        self.catalog
            .get(index)
            .ok_or_else(|| OnboardingError::StepOutOfRange(index).into())
    }

    async fn post(
        &self,
        channel: ChannelId,
        content: impl Into<String>,
    ) -> std::result::Result<HistoryMessage, GatewayError> {
        self.deps
            .gateway
            .send_message(channel, OutgoingMessage::text(content))
            .await
    }

    // ── Entry points ────────────────────────────────────────────────

    /// A member joined: open their channel and ask the first step.
    pub async fn start(self: &Arc<Self>, member: &MemberProfile) -> Result<ChannelRef> {
        let name = channel_name(&self.config.channel_prefix, &member.username, member.id);
        let channel = self
            .deps
            .gateway
            .create_onboarding_channel(&name, member.id)
            .await?;
        info!(member_id = %member.id, channel_id = %channel.id, channel = %channel.name, "Onboarding channel created");

        let _guard = self.registry.acquire(member.id).await;
        self.registry.cancel_poll(member.id).await;

        // A rejoin while the previous channel survived, e.g. the bot was offline at removal.
        if let Some(previous) = self.deps.store.get_session(member.id).await? {
            if previous.is_active() && previous.channel_id != channel.id {
                self.remove_channel(member.id, previous.channel_id).await;
            }
        }

        self.deps
            .store
            .upsert_session(&OnboardingSession::new(member.id, channel.id))
            .await?;
        self.advance_to(0, channel.id, member.id).await?;
        Ok(channel)
    }

    /// A message was posted. Only the channel owner's messages count.
    pub async fn handle_message(self: &Arc<Self>, message: &IncomingText) -> Result<()> {
        if message.author_is_bot || message.author == self.deps.gateway.bot_id() {
            return Ok(());
        }
        let Some(owner) = self.owner_of(&message.channel.name) else {
            return Ok(());
        };
        if message.author != owner {
            return Ok(());
        }

        let _guard = self.registry.acquire(owner).await;
        let channel = message.channel.id;
        let current = self.locate_current_step(owner, channel).await?;
        let step = self.step(current.index)?;

        if message.content.trim().eq_ignore_ascii_case("help") {
            if let Some(help) = &step.help {
                self.post(channel, format_info(help)).await?;
            }
            return Ok(());
        }

        if !matches!(step.kind, StepKind::TextAnswer { .. } | StepKind::Informational) {
            debug!(member_id = %owner, step = current.index, "Ignoring text on a step that isn't answered by text");
            return Ok(());
        }

        self.submit_answer(current.index, channel, owner, &message.content)
            .await
    }

    /// A reaction was added. Only the owner's reaction on the current question counts.
    pub async fn handle_reaction(self: &Arc<Self>, reaction: &IncomingReaction) -> Result<()> {
        if reaction.user == self.deps.gateway.bot_id() {
            return Ok(());
        }
        let Some(owner) = self.owner_of(&reaction.channel.name) else {
            return Ok(());
        };
        if reaction.user != owner {
            return Ok(());
        }

        let _guard = self.registry.acquire(owner).await;
        let channel = reaction.channel.id;
        let current = self.locate_current_step(owner, channel).await?;
        if current.question.message_id != reaction.message {
            debug!(member_id = %owner, "Ignoring reaction on an old message");
            return Ok(());
        }

        let step = self.step(current.index)?;
        if let Some(expected) = step.expected_reaction() {
            if expected != reaction.emoji {
                debug!(member_id = %owner, emoji = %reaction.emoji, "Ignoring unexpected reaction");
                return Ok(());
            }
        }

        self.deps
            .gateway
            .set_write_access(channel, owner, true)
            .await?;
        self.submit_answer(current.index, channel, owner, &reaction.emoji)
            .await
    }

    /// A member left or was removed: stop their poll and clean up.
    pub async fn member_left(self: &Arc<Self>, member: MemberId) -> Result<()> {
        self.registry.cancel_poll(member).await;
        let _guard = self.registry.acquire(member).await;

        let session = self.deps.store.get_session(member).await?;
        let channels = match &session {
            Some(s) if s.is_active() => vec![s.channel_id],
            Some(_) => Vec::new(),
            None => self
                .deps
                .gateway
                .list_channels()
                .await?
                .into_iter()
                .filter(|c| self.owner_of(&c.name) == Some(member))
                .map(|c| c.id)
                .collect(),
        };

        for channel in channels {
            self.remove_channel(member, channel).await;
        }

        if session.is_some_and(|s| s.is_active()) {
            self.deps
                .store
                .set_session_status(member, SessionStatus::Abandoned)
                .await?;
        }

        Ok(())
    }

    async fn remove_channel(&self, member: MemberId, channel: ChannelId) {
        match self.deps.gateway.delete_channel(channel).await {
            Ok(()) => info!(member_id = %member, channel_id = %channel, "Onboarding channel removed"),
            Err(GatewayError::ChannelNotFound(_)) => {
                debug!(member_id = %member, channel_id = %channel, "Onboarding channel already gone")
            }
            Err(e) => warn!(member_id = %member, channel_id = %channel, error = %e, "Failed to delete onboarding channel"),
        }
    }

    // ── Core operations (callers hold the member's lock) ────────────

    /// The step `member` is on in `channel`.
    ///
    /// Reads the session record; when it has no question yet, derives the
    /// step from the channel history and backfills the record.
    pub async fn locate_current_step(
        &self,
        member: MemberId,
        channel: ChannelId,
    ) -> Result<CurrentStep> {
        let session = self.deps.store.get_session(member).await?;

        if let Some(session) = &session {
            if session.channel_id != channel || !session.is_active() {
                return Err(OnboardingError::SessionClosed {
                    member_id: member.get(),
                    channel_id: channel.get(),
                }
                .into());
            }
            if let Some(question) = session.question {
                self.step(session.step_index)?;
                return Ok(CurrentStep {
                    index: session.step_index,
                    question,
                });
            }
        }

        let history = self
            .deps
            .gateway
            .recent_messages(channel, self.config.history_limit)
            .await?;
        let (index, message) =
            derive_current_step(channel, &history, self.deps.gateway.bot_id(), &self.catalog)?;
        let question = QuestionRef {
            message_id: message.id,
            posted_at: message.posted_at,
        };

        match session {
            Some(_) => {
                self.deps
                    .store
                    .record_question(member, index, question)
                    .await?
            }
            None => {
                let session = OnboardingSession {
                    step_index: index,
                    question: Some(question),
                    ..OnboardingSession::new(member, channel)
                };
                self.deps.store.upsert_session(&session).await?;
            }
        }
        info!(member_id = %member, channel_id = %channel, step = index, "Session restored from channel history");

        Ok(CurrentStep { index, question })
    }

    /// Answer step `index`: validate, process, then move on.
    ///
    /// A rejected answer is reported in the channel and leaves the step current.
    pub async fn submit_answer(
        self: &Arc<Self>,
        index: usize,
        channel: ChannelId,
        member: MemberId,
        answer: &str,
    ) -> Result<()> {
        let step = self.step(index)?;

        if let Some(error) = step.validate(answer) {
            debug!(member_id = %member, step = index, "Answer rejected");
            self.post(channel, format_error(member, &error)).await?;
            return Ok(());
        }

        match &step.kind {
            StepKind::TextAnswer {
                action: AnswerAction::SetNickname,
                ..
            } => {
                self.deps
                    .gateway
                    .set_nickname(member, answer.trim())
                    .await?;
            }
            StepKind::ExternalPoll { condition } => {
                return self.arm_poll(index, channel, member, *condition).await;
            }
            _ => {}
        }

        self.finish_step(index, channel, member).await
    }

    /// Post step `index`'s success message and advance past it.
    pub async fn finish_step(
        self: &Arc<Self>,
        index: usize,
        channel: ChannelId,
        member: MemberId,
    ) -> Result<()> {
        if let Some(success) = &self.step(index)?.success_message {
            self.post(channel, success.as_str()).await?;
        }
        self.advance_to(index + 1, channel, member).await
    }

    /// Ask the first step at or after `index` that isn't skipped, or complete.
    pub async fn advance_to(
        self: &Arc<Self>,
        index: usize,
        channel: ChannelId,
        member: MemberId,
    ) -> Result<()> {
        let mut index = index;
        loop {
            let Some(step) = self.catalog.get(index) else {
                self.completion.complete(member, channel).await;
                self.registry.cancel_poll(member).await;
                return Ok(());
            };

            if self.should_skip(step, member).await {
                debug!(member_id = %member, step = index, "Step skipped");
                index += 1;
                continue;
            }

            let mut message = OutgoingMessage::text(step.question.as_str());
            if let Some(path) = &step.attachment {
                message = message.with_attachment(path.clone());
            }
            let posted = self.deps.gateway.send_message(channel, message).await?;
            let question = QuestionRef {
                message_id: posted.id,
                posted_at: posted.posted_at,
            };
            self.deps
                .store
                .record_question(member, index, question)
                .await?;
            debug!(member_id = %member, channel_id = %channel, step = index, "Question posted");

            if let Some(emoji) = step.expected_reaction() {
                self.deps
                    .gateway
                    .set_write_access(channel, member, false)
                    .await?;
                self.deps
                    .gateway
                    .add_reaction(channel, posted.id, emoji)
                    .await?;
            }

            match &step.kind {
                StepKind::ExternalPoll { condition } => {
                    return self.arm_poll(index, channel, member, *condition).await;
                }
                StepKind::Informational => {
                    if let Some(success) = &step.success_message {
                        self.post(channel, success.as_str()).await?;
                    }
                    index += 1;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Evaluate a step's skip rule. `UnlockRole` grants its role and never skips.
    async fn should_skip(&self, step: &OnboardingStep, member: MemberId) -> bool {
        match &step.skip {
            SkipRule::Never => false,
            SkipRule::IfAvatarSet => match self.deps.gateway.fetch_member(member).await {
                Ok(profile) => profile.is_some_and(|p| p.has_avatar),
                Err(e) => {
                    warn!(member_id = %member, error = %e, "Failed to fetch member for skip check");
                    false
                }
            },
            SkipRule::IfAccountLinked => self.deps.linker.find_linked_account(member).await.is_some(),
            SkipRule::UnlockRole(role) => {
                if let Err(e) = self.deps.gateway.add_role(member, *role).await {
                    error!(member_id = %member, role = %role, error = %e, "Failed to unlock role");
                }
                false
            }
        }
    }

    // ── External polls ──────────────────────────────────────────────

    /// Disable input and start waiting for `condition` in the background.
    async fn arm_poll(
        self: &Arc<Self>,
        index: usize,
        channel: ChannelId,
        member: MemberId,
        condition: PollCondition,
    ) -> Result<()> {
        self.deps
            .gateway
            .set_write_access(channel, member, false)
            .await?;
        let token = self.registry.poll_token(member).await;
        self.spawn_poll(index, channel, member, condition, token);
        Ok(())
    }

    fn spawn_poll(
        self: &Arc<Self>,
        index: usize,
        channel: ChannelId,
        member: MemberId,
        condition: PollCondition,
        token: CancellationToken,
    ) {
        let sequencer = Arc::clone(self);
        tokio::spawn(async move {
            sequencer
                .run_poll(index, channel, member, condition, token)
                .await;
        });
        debug!(member_id = %member, step = index, condition = ?condition, "Poll armed");
    }

    async fn run_poll(
        self: Arc<Self>,
        index: usize,
        channel: ChannelId,
        member: MemberId,
        condition: PollCondition,
        token: CancellationToken,
    ) {
        let outcome = match condition {
            PollCondition::AvatarSet => {
                let gateway = &self.deps.gateway;
                poll_until(self.config.poll_interval, &token, || async move {
                    match gateway.fetch_member(member).await {
                        Ok(profile) => profile.filter(|p| p.has_avatar).map(|_| ()),
                        Err(e) => {
                            debug!(member_id = %member, error = %e, "Avatar check failed");
                            None
                        }
                    }
                })
                .await
                .map(|()| None)
            }
            PollCondition::AccountLinked => self
                .deps
                .linker
                .wait_for_account(member, &token)
                .await
                .map(Some),
        };

        let Some(account) = outcome else {
            debug!(member_id = %member, step = index, "Poll cancelled");
            return;
        };

        let _guard = self.registry.acquire(member).await;
        if token.is_cancelled() {
            return;
        }
        if let Err(e) = self.resume_after_poll(index, channel, member, account).await {
            error!(member_id = %member, channel_id = %channel, step = index, error = %e, "Failed to resume after poll");
        }
    }

    async fn resume_after_poll(
        self: &Arc<Self>,
        index: usize,
        channel: ChannelId,
        member: MemberId,
        account: Option<Account>,
    ) -> Result<()> {
        let current = self.locate_current_step(member, channel).await?;
        if current.index != index {
            debug!(member_id = %member, step = index, current = current.index, "Poll result is stale");
            return Ok(());
        }

        info!(member_id = %member, step = index, "External condition met");
        if account.is_some_and(|a| a.active_subscription) {
            self.post(channel, PRO_NOTICE).await?;
        }
        self.deps
            .gateway
            .set_write_access(channel, member, true)
            .await?;
        self.finish_step(index, channel, member).await
    }
}
