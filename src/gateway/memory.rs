//! In-memory gateway — a fake guild with a controllable clock.
//!
//! Records every side effect so tests can assert on what the bot did.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{
    ChannelId, ChannelRef, ChatGateway, HistoryMessage, MemberId, MemberProfile, MessageId,
    OutgoingMessage, RoleId,
};
use crate::error::GatewayError;

#[derive(Debug, Default)]
struct GuildState {
    members: HashMap<MemberId, MemberProfile>,
    channels: Vec<ChannelRef>,
    deleted_channels: Vec<ChannelId>,
    messages: HashMap<ChannelId, Vec<HistoryMessage>>,
    outgoing: HashMap<ChannelId, Vec<OutgoingMessage>>,
    reactions: Vec<(ChannelId, MessageId, String)>,
    write_denied: HashSet<(ChannelId, MemberId)>,
    roles: HashMap<MemberId, Vec<RoleId>>,
    nicknames: HashMap<MemberId, String>,
    kicked: Vec<MemberId>,
    direct_messages: Vec<(MemberId, String)>,
}

/// Fake chat platform for tests.
pub struct InMemoryGateway {
    bot_id: MemberId,
    state: Mutex<GuildState>,
    now: Mutex<DateTime<Utc>>,
    next_id: AtomicU64,
    fail_role_grants: AtomicBool,
}

impl InMemoryGateway {
    pub fn new(bot_id: MemberId) -> Self {
        Self {
            bot_id,
            state: Mutex::new(GuildState::default()),
            now: Mutex::new(Utc::now()),
            next_id: AtomicU64::new(1_000),
            fail_role_grants: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GuildState> {
        self.state.lock().expect("in-memory gateway mutex poisoned")
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Current fake time, stamped on every posted message.
    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }

    pub fn advance_clock(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }

    /// Make every subsequent `add_role` call fail with a permission error.
    pub fn fail_role_grants(&self, fail: bool) {
        self.fail_role_grants.store(fail, Ordering::Relaxed);
    }

    pub fn add_member(&self, profile: MemberProfile) {
        self.state().members.insert(profile.id, profile);
    }

    pub fn remove_member(&self, member: MemberId) {
        self.state().members.remove(&member);
    }

    pub fn set_avatar(&self, member: MemberId, has_avatar: bool) {
        if let Some(profile) = self.state().members.get_mut(&member) {
            profile.has_avatar = has_avatar;
        }
    }

    /// Create a channel without going through the onboarding flow.
    pub fn add_channel(&self, name: &str) -> ChannelRef {
        let channel = ChannelRef {
            id: ChannelId(self.next_id()),
            name: name.to_string(),
        };
        self.state().channels.push(channel.clone());
        channel
    }

    /// Insert a message into a channel's history as if `author` posted it.
    pub fn post_as(&self, channel: ChannelId, author: MemberId, content: &str) -> HistoryMessage {
        let message = HistoryMessage {
            id: MessageId(self.next_id()),
            author,
            content: content.to_string(),
            posted_at: self.now(),
        };
        self.state()
            .messages
            .entry(channel)
            .or_default()
            .push(message.clone());
        message
    }

    /// All messages in a channel, oldest first.
    pub fn messages(&self, channel: ChannelId) -> Vec<HistoryMessage> {
        self.state()
            .messages
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Contents of the bot's messages in a channel, oldest first.
    pub fn bot_messages(&self, channel: ChannelId) -> Vec<String> {
        self.messages(channel)
            .into_iter()
            .filter(|m| m.author == self.bot_id)
            .map(|m| m.content)
            .collect()
    }

    /// Outgoing payloads (including attachments and embeds) sent to a channel.
    pub fn outgoing(&self, channel: ChannelId) -> Vec<OutgoingMessage> {
        self.state()
            .outgoing
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn channels(&self) -> Vec<ChannelRef> {
        self.state().channels.clone()
    }

    pub fn channel_named(&self, name: &str) -> Option<ChannelRef> {
        self.state().channels.iter().find(|c| c.name == name).cloned()
    }

    pub fn is_deleted(&self, channel: ChannelId) -> bool {
        self.state().deleted_channels.contains(&channel)
    }

    pub fn reactions(&self) -> Vec<(ChannelId, MessageId, String)> {
        self.state().reactions.clone()
    }

    pub fn can_write(&self, channel: ChannelId, member: MemberId) -> bool {
        !self.state().write_denied.contains(&(channel, member))
    }

    pub fn roles_of(&self, member: MemberId) -> Vec<RoleId> {
        self.state().roles.get(&member).cloned().unwrap_or_default()
    }

    pub fn nickname_of(&self, member: MemberId) -> Option<String> {
        self.state().nicknames.get(&member).cloned()
    }

    pub fn kicked(&self) -> Vec<MemberId> {
        self.state().kicked.clone()
    }

    pub fn direct_messages(&self, member: MemberId) -> Vec<String> {
        self.state()
            .direct_messages
            .iter()
            .filter(|(to, _)| *to == member)
            .map(|(_, content)| content.clone())
            .collect()
    }
}

#[async_trait]
impl ChatGateway for InMemoryGateway {
    fn bot_id(&self) -> MemberId {
        self.bot_id
    }

    async fn create_onboarding_channel(
        &self,
        name: &str,
        _member: MemberId,
    ) -> Result<ChannelRef, GatewayError> {
        Ok(self.add_channel(name))
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), GatewayError> {
        let mut state = self.state();
        let before = state.channels.len();
        state.channels.retain(|c| c.id != channel);
        if state.channels.len() == before {
            return Err(GatewayError::ChannelNotFound(channel.get()));
        }
        state.deleted_channels.push(channel);
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<ChannelRef>, GatewayError> {
        Ok(self.channels())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<HistoryMessage, GatewayError> {
        if !self.state().channels.iter().any(|c| c.id == channel) {
            return Err(GatewayError::ChannelNotFound(channel.get()));
        }
        let posted = self.post_as(channel, self.bot_id, &message.content);
        self.state().outgoing.entry(channel).or_default().push(message);
        Ok(posted)
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> Result<(), GatewayError> {
        self.state()
            .reactions
            .push((channel, message, emoji.to_string()));
        Ok(())
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<HistoryMessage>, GatewayError> {
        let mut messages = self.messages(channel);
        messages.reverse();
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn set_write_access(
        &self,
        channel: ChannelId,
        member: MemberId,
        allowed: bool,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        if allowed {
            state.write_denied.remove(&(channel, member));
        } else {
            state.write_denied.insert((channel, member));
        }
        Ok(())
    }

    async fn fetch_member(&self, member: MemberId) -> Result<Option<MemberProfile>, GatewayError> {
        Ok(self.state().members.get(&member).cloned())
    }

    async fn set_nickname(&self, member: MemberId, nickname: &str) -> Result<(), GatewayError> {
        self.state()
            .nicknames
            .insert(member, nickname.to_string());
        Ok(())
    }

    async fn add_role(&self, member: MemberId, role: RoleId) -> Result<(), GatewayError> {
        if self.fail_role_grants.load(Ordering::Relaxed) {
            return Err(GatewayError::PermissionDenied {
                operation: "add_role".into(),
                reason: "Missing Permissions".into(),
            });
        }
        self.state().roles.entry(member).or_default().push(role);
        Ok(())
    }

    async fn kick_member(&self, member: MemberId) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.members.remove(&member);
        state.kicked.push(member);
        Ok(())
    }

    async fn send_direct_message(
        &self,
        member: MemberId,
        content: &str,
    ) -> Result<(), GatewayError> {
        self.state()
            .direct_messages
            .push((member, content.to_string()));
        Ok(())
    }
}
