//! Discord event handler — turns gateway events into onboarding and karma calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serenity::all::{
    ChannelId as DiscordChannelId, Context, EventHandler, GuildId, Member, Message, Reaction,
    ReactionType, Ready, User,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{ChannelId, ChannelRef, MemberId, MemberProfile, MessageId};
use crate::karma::{KarmaReaction, KarmaTracker};
use crate::onboarding::{
    IncomingReaction, IncomingText, StepSequencer, Watchdog, recover, spawn_watchdog,
};

/// Routes serenity events for one guild.
pub struct EventRouter {
    sequencer: Arc<StepSequencer>,
    karma: Arc<KarmaTracker>,
    watchdog: Arc<Watchdog>,
    guild_id: u64,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl EventRouter {
    pub fn new(
        sequencer: Arc<StepSequencer>,
        karma: Arc<KarmaTracker>,
        watchdog: Arc<Watchdog>,
        guild_id: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sequencer,
            karma,
            watchdog,
            guild_id,
            shutdown,
            started: AtomicBool::new(false),
        }
    }

    fn is_our_guild(&self, guild: Option<GuildId>) -> bool {
        guild.is_some_and(|g| g.get() == self.guild_id)
    }
}

fn profile_of(user: &User) -> MemberProfile {
    MemberProfile {
        id: MemberId(user.id.get()),
        username: user.name.clone(),
        has_avatar: user.avatar.is_some(),
    }
}

/// Name of the emoji; custom emoji go by their name.
fn emoji_name(emoji: &ReactionType) -> String {
    match emoji {
        ReactionType::Unicode(s) => s.clone(),
        ReactionType::Custom { name, .. } => name.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

async fn channel_ref(ctx: &Context, channel: DiscordChannelId) -> Option<ChannelRef> {
    let channel = channel.to_channel(ctx).await.ok()?.guild()?;
    Some(ChannelRef {
        id: ChannelId(channel.id.get()),
        name: channel.name,
    })
}

#[async_trait]
impl EventHandler for EventRouter {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, "Connected to Discord");

        // Ready fires again after reconnects; recover and start the sweep once.
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = recover(&self.sequencer).await {
            error!(error = %e, "Startup recovery failed");
        }
        spawn_watchdog(Arc::clone(&self.watchdog), self.shutdown.clone());
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        if new_member.guild_id.get() != self.guild_id || new_member.user.bot {
            return;
        }
        let profile = profile_of(&new_member.user);
        info!(member_id = %profile.id, username = %profile.username, "Member joined");
        if let Err(e) = self.sequencer.start(&profile).await {
            error!(member_id = %profile.id, error = %e, "Failed to start onboarding");
        }
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        user: User,
        _member_data_if_available: Option<Member>,
    ) {
        if guild_id.get() != self.guild_id {
            return;
        }
        let member = MemberId(user.id.get());
        info!(member_id = %member, "Member left");
        if let Err(e) = self.sequencer.member_left(member).await {
            error!(member_id = %member, error = %e, "Failed to clean up after member left");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || !self.is_our_guild(msg.guild_id) {
            return;
        }
        let Some(channel) = channel_ref(&ctx, msg.channel_id).await else {
            return;
        };
        if self.sequencer.owner_of(&channel.name).is_none() {
            return;
        }

        let incoming = IncomingText {
            channel,
            author: MemberId(msg.author.id.get()),
            author_is_bot: msg.author.bot,
            content: msg.content,
        };
        if let Err(e) = self.sequencer.handle_message(&incoming).await {
            error!(member_id = %incoming.author, channel = %incoming.channel.name, error = %e, "Failed to handle onboarding message");
        }
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        if !self.is_our_guild(reaction.guild_id) {
            return;
        }
        let Some(user) = reaction.user_id else {
            return;
        };
        let user = MemberId(user.get());
        let emoji = emoji_name(&reaction.emoji);

        if let Some(author) = reaction.message_author_id {
            let karma = KarmaReaction {
                reactor: user,
                author: MemberId(author.get()),
                channel: ChannelId(reaction.channel_id.get()),
                message: MessageId(reaction.message_id.get()),
                emoji: emoji.clone(),
            };
            if let Err(e) = self.karma.handle_reaction(&karma).await {
                warn!(member_id = %user, error = %e, "Failed to record karma");
            }
        }

        let Some(channel) = channel_ref(&ctx, reaction.channel_id).await else {
            return;
        };
        if self.sequencer.owner_of(&channel.name).is_none() {
            return;
        }
        let incoming = IncomingReaction {
            channel,
            message: MessageId(reaction.message_id.get()),
            user,
            emoji,
        };
        if let Err(e) = self.sequencer.handle_reaction(&incoming).await {
            error!(member_id = %user, channel = %incoming.channel.name, error = %e, "Failed to handle onboarding reaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use serenity::all::EmojiId;

    use super::*;

    #[test]
    fn emoji_names() {
        assert_eq!(emoji_name(&ReactionType::Unicode("✅".into())), "✅");
        assert_eq!(
            emoji_name(&ReactionType::Custom {
                animated: false,
                id: EmojiId::new(1),
                name: Some("pumpkin".into()),
            }),
            "pumpkin"
        );
    }
}
