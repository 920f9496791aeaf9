//! Channel gateway — the chat platform surface the onboarding flow talks to.
//!
//! The sequencer, watchdog and completion handler only ever see the
//! `ChatGateway` trait. `DiscordGateway` drives the real platform over
//! serenity's HTTP client; `InMemoryGateway` backs the tests.

pub mod discord;
pub mod events;
pub mod memory;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub use discord::DiscordGateway;
pub use events::EventRouter;
pub use memory::InMemoryGateway;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake!(
    /// A guild member (or user) id.
    MemberId
);
snowflake!(
    /// A text channel id.
    ChannelId
);
snowflake!(
    /// A message id. Ids grow monotonically, so they order messages.
    MessageId
);
snowflake!(
    /// A guild role id.
    RoleId
);

/// A channel as seen by the onboarding flow: its id and its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: ChannelId,
    pub name: String,
}

/// The parts of a guild member the onboarding flow cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberProfile {
    pub id: MemberId,
    pub username: String,
    pub has_avatar: bool,
}

/// A message from a channel's history (or one the bot just posted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub id: MessageId,
    pub author: MemberId,
    pub content: String,
    pub posted_at: DateTime<Utc>,
}

/// A rich embed attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub author: Option<String>,
    pub description: String,
    pub colour: u32,
}

/// Message to post in a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub attachment: Option<PathBuf>,
    pub embed: Option<Embed>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }

    pub fn with_embed(mut self, embed: Embed) -> Self {
        self.embed = Some(embed);
        self
    }
}

/// Operations the bot performs on the chat platform.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// The bot's own user id.
    fn bot_id(&self) -> MemberId;

    /// Create a private channel visible only to `member` and the bot.
    async fn create_onboarding_channel(
        &self,
        name: &str,
        member: MemberId,
    ) -> Result<ChannelRef, GatewayError>;

    /// Delete a channel.
    async fn delete_channel(&self, channel: ChannelId) -> Result<(), GatewayError>;

    /// List the guild's text channels.
    async fn list_channels(&self) -> Result<Vec<ChannelRef>, GatewayError>;

    /// Post a message and return it as stored by the platform.
    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<HistoryMessage, GatewayError>;

    /// Attach a unicode reaction to a message.
    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> Result<(), GatewayError>;

    /// Fetch up to `limit` recent messages, newest first.
    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<HistoryMessage>, GatewayError>;

    /// Allow or deny `member` sending messages in `channel`. The member keeps
    /// read access either way.
    async fn set_write_access(
        &self,
        channel: ChannelId,
        member: MemberId,
        allowed: bool,
    ) -> Result<(), GatewayError>;

    /// Look up a guild member. `Ok(None)` when they are no longer in the guild.
    async fn fetch_member(&self, member: MemberId) -> Result<Option<MemberProfile>, GatewayError>;

    async fn set_nickname(&self, member: MemberId, nickname: &str) -> Result<(), GatewayError>;

    async fn add_role(&self, member: MemberId, role: RoleId) -> Result<(), GatewayError>;

    /// Remove a member from the guild.
    async fn kick_member(&self, member: MemberId) -> Result<(), GatewayError>;

    async fn send_direct_message(&self, member: MemberId, content: &str)
    -> Result<(), GatewayError>;
}
