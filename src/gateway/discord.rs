//! Discord gateway — serenity HTTP calls behind the `ChatGateway` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    ChannelId as DiscordChannelId, ChannelType, CreateAttachment, CreateChannel, CreateEmbed,
    CreateEmbedAuthor, CreateMessage, EditMember, GetMessages, GuildId, Http, Message,
    MessageId as DiscordMessageId, PermissionOverwrite, PermissionOverwriteType, Permissions,
    ReactionType, RoleId as DiscordRoleId, Timestamp, UserId,
};
use serenity::http::HttpError;
use tracing::debug;

use super::{
    ChannelId, ChannelRef, ChatGateway, HistoryMessage, MemberId, MemberProfile, MessageId,
    OutgoingMessage, RoleId,
};
use crate::config::GuildConfig;
use crate::error::GatewayError;

/// Discord gateway bound to a single guild.
pub struct DiscordGateway {
    http: Arc<Http>,
    bot_id: MemberId,
    guild: GuildConfig,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>, bot_id: MemberId, guild: GuildConfig) -> Self {
        Self { http, bot_id, guild }
    }

    fn http(&self) -> &Http {
        &self.http
    }

    fn guild_id(&self) -> GuildId {
        GuildId::new(self.guild.guild_id)
    }
}

/// Permissions the bot needs inside every onboarding channel.
fn bot_permissions() -> Permissions {
    Permissions::VIEW_CHANNEL
        | Permissions::SEND_MESSAGES
        | Permissions::MANAGE_CHANNELS
        | Permissions::ADD_REACTIONS
        | Permissions::ATTACH_FILES
}

/// Overwrites for a fresh onboarding channel: hidden from everyone except the
/// member and the bot.
fn onboarding_overwrites(
    everyone: RoleId,
    member: MemberId,
    bot: MemberId,
) -> Vec<PermissionOverwrite> {
    vec![
        PermissionOverwrite {
            allow: Permissions::empty(),
            deny: Permissions::VIEW_CHANNEL,
            kind: PermissionOverwriteType::Role(DiscordRoleId::new(everyone.get())),
        },
        member_overwrite(member, true),
        PermissionOverwrite {
            allow: bot_permissions(),
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Member(UserId::new(bot.get())),
        },
    ]
}

fn member_overwrite(member: MemberId, can_write: bool) -> PermissionOverwrite {
    let deny = if can_write {
        Permissions::empty()
    } else {
        Permissions::SEND_MESSAGES
    };
    PermissionOverwrite {
        allow: Permissions::VIEW_CHANNEL,
        deny,
        kind: PermissionOverwriteType::Member(UserId::new(member.get())),
    }
}

fn status_of(err: &serenity::Error) -> Option<u16> {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            Some(response.status_code.as_u16())
        }
        _ => None,
    }
}

fn request_error(operation: &str, err: serenity::Error) -> GatewayError {
    match status_of(&err) {
        Some(403) => GatewayError::PermissionDenied {
            operation: operation.to_string(),
            reason: err.to_string(),
        },
        _ => GatewayError::RequestFailed {
            operation: operation.to_string(),
            reason: err.to_string(),
        },
    }
}

fn to_utc(timestamp: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

fn to_history(message: Message) -> HistoryMessage {
    HistoryMessage {
        id: MessageId(message.id.get()),
        author: MemberId(message.author.id.get()),
        posted_at: to_utc(message.timestamp),
        content: message.content,
    }
}

#[async_trait]
impl ChatGateway for DiscordGateway {
    fn bot_id(&self) -> MemberId {
        self.bot_id
    }

    async fn create_onboarding_channel(
        &self,
        name: &str,
        member: MemberId,
    ) -> Result<ChannelRef, GatewayError> {
        let builder = CreateChannel::new(name)
            .kind(ChannelType::Text)
            .category(DiscordChannelId::new(self.guild.category_id.get()))
            .permissions(onboarding_overwrites(
                self.guild.everyone_role,
                member,
                self.bot_id,
            ));

        let channel = self
            .guild_id()
            .create_channel(self.http(), builder)
            .await
            .map_err(|e| request_error("create_channel", e))?;

        debug!(channel_id = %channel.id, name = %channel.name, "Created onboarding channel");
        Ok(ChannelRef {
            id: ChannelId(channel.id.get()),
            name: channel.name,
        })
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), GatewayError> {
        match DiscordChannelId::new(channel.get()).delete(self.http()).await {
            Ok(_) => Ok(()),
            Err(e) if status_of(&e) == Some(404) => Err(GatewayError::ChannelNotFound(channel.get())),
            Err(e) => Err(request_error("delete_channel", e)),
        }
    }

    async fn list_channels(&self) -> Result<Vec<ChannelRef>, GatewayError> {
        let channels = self
            .guild_id()
            .channels(self.http())
            .await
            .map_err(|e| request_error("list_channels", e))?;

        Ok(channels
            .into_values()
            .filter(|c| c.kind == ChannelType::Text)
            .map(|c| ChannelRef {
                id: ChannelId(c.id.get()),
                name: c.name,
            })
            .collect())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<HistoryMessage, GatewayError> {
        let mut builder = CreateMessage::new().content(message.content);

        if let Some(path) = &message.attachment {
            let file = CreateAttachment::path(path)
                .await
                .map_err(|e| GatewayError::Attachment {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            builder = builder.add_file(file);
        }

        if let Some(embed) = message.embed {
            let mut rich = CreateEmbed::new()
                .description(embed.description)
                .colour(embed.colour);
            if let Some(author) = embed.author {
                rich = rich.author(CreateEmbedAuthor::new(author));
            }
            builder = builder.embed(rich);
        }

        let posted = DiscordChannelId::new(channel.get())
            .send_message(self.http(), builder)
            .await
            .map_err(|e| request_error("send_message", e))?;
        Ok(to_history(posted))
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> Result<(), GatewayError> {
        DiscordChannelId::new(channel.get())
            .create_reaction(
                self.http(),
                DiscordMessageId::new(message.get()),
                ReactionType::Unicode(emoji.to_string()),
            )
            .await
            .map_err(|e| request_error("add_reaction", e))
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<HistoryMessage>, GatewayError> {
        let messages = DiscordChannelId::new(channel.get())
            .messages(self.http(), GetMessages::new().limit(limit))
            .await
            .map_err(|e| request_error("recent_messages", e))?;
        Ok(messages.into_iter().map(to_history).collect())
    }

    async fn set_write_access(
        &self,
        channel: ChannelId,
        member: MemberId,
        allowed: bool,
    ) -> Result<(), GatewayError> {
        DiscordChannelId::new(channel.get())
            .create_permission(self.http(), member_overwrite(member, allowed))
            .await
            .map_err(|e| request_error("set_write_access", e))
    }

    async fn fetch_member(&self, member: MemberId) -> Result<Option<MemberProfile>, GatewayError> {
        match self
            .guild_id()
            .member(self.http(), UserId::new(member.get()))
            .await
        {
            Ok(m) => Ok(Some(MemberProfile {
                id: member,
                has_avatar: m.user.avatar.is_some(),
                username: m.user.name,
            })),
            Err(e) if status_of(&e) == Some(404) => Ok(None),
            Err(e) => Err(request_error("fetch_member", e)),
        }
    }

    async fn set_nickname(&self, member: MemberId, nickname: &str) -> Result<(), GatewayError> {
        self.guild_id()
            .edit_member(
                self.http(),
                UserId::new(member.get()),
                EditMember::new().nickname(nickname),
            )
            .await
            .map(|_| ())
            .map_err(|e| request_error("set_nickname", e))
    }

    async fn add_role(&self, member: MemberId, role: RoleId) -> Result<(), GatewayError> {
        self.http
            .add_member_role(
                self.guild_id(),
                UserId::new(member.get()),
                DiscordRoleId::new(role.get()),
                Some("Onboarding"),
            )
            .await
            .map_err(|e| request_error("add_role", e))
    }

    async fn kick_member(&self, member: MemberId) -> Result<(), GatewayError> {
        self.guild_id()
            .kick(self.http(), UserId::new(member.get()))
            .await
            .map_err(|e| request_error("kick_member", e))
    }

    async fn send_direct_message(
        &self,
        member: MemberId,
        content: &str,
    ) -> Result<(), GatewayError> {
        UserId::new(member.get())
            .direct_message(self.http(), CreateMessage::new().content(content))
            .await
            .map(|_| ())
            .map_err(|e| request_error("send_direct_message", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarding_channel_hides_from_everyone() {
        let overwrites = onboarding_overwrites(RoleId(10), MemberId(20), MemberId(30));
        assert_eq!(overwrites.len(), 3);

        let everyone = &overwrites[0];
        assert!(everyone.deny.contains(Permissions::VIEW_CHANNEL));
        assert!(matches!(
            everyone.kind,
            PermissionOverwriteType::Role(role) if role.get() == 10
        ));

        let member = &overwrites[1];
        assert!(member.allow.contains(Permissions::VIEW_CHANNEL));
        assert!(member.deny.is_empty());

        let bot = &overwrites[2];
        assert!(bot.allow.contains(Permissions::MANAGE_CHANNELS));
        assert!(bot.allow.contains(Permissions::ADD_REACTIONS));
    }

    #[test]
    fn disabled_input_keeps_read_access() {
        let overwrite = member_overwrite(MemberId(5), false);
        assert!(overwrite.allow.contains(Permissions::VIEW_CHANNEL));
        assert!(overwrite.deny.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn non_http_errors_map_to_request_failed() {
        let err = request_error("send_message", serenity::Error::Other("boom"));
        assert!(matches!(err, GatewayError::RequestFailed { ref operation, .. } if operation == "send_message"));
    }
}
