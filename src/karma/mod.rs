//! Karma — a point for every 💜 a member's message receives.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::Result;
use crate::gateway::{ChannelId, ChatGateway, Embed, MemberId, MessageId, OutgoingMessage};
use crate::store::Database;

/// Emoji that awards karma.
pub const KARMA_EMOJI: &str = "💜";

const EMBED_COLOUR: u32 = 0x0099ff;
const EMBED_AUTHOR: &str = "Scrimba";

/// A reaction as the karma tracker sees it.
#[derive(Debug, Clone)]
pub struct KarmaReaction {
    pub reactor: MemberId,
    pub author: MemberId,
    pub channel: ChannelId,
    pub message: MessageId,
    pub emoji: String,
}

pub struct KarmaTracker {
    gateway: Arc<dyn ChatGateway>,
    store: Arc<dyn Database>,
    notifications: Option<ChannelId>,
}

impl KarmaTracker {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        store: Arc<dyn Database>,
        notifications: Option<ChannelId>,
    ) -> Self {
        Self {
            gateway,
            store,
            notifications,
        }
    }

    /// Award a point for a 💜 reaction. Returns the author's new total when a point was given.
    pub async fn handle_reaction(&self, reaction: &KarmaReaction) -> Result<Option<i64>> {
        if reaction.emoji != KARMA_EMOJI
            || reaction.reactor == reaction.author
            || reaction.reactor == self.gateway.bot_id()
        {
            return Ok(None);
        }

        let recorded = self
            .store
            .record_reputation(
                reaction.reactor,
                reaction.author,
                reaction.message,
                1,
                Utc::now(),
            )
            .await?;
        if !recorded {
            debug!(from = %reaction.reactor, message_id = %reaction.message, "Karma already given for this message");
            return Ok(None);
        }

        let total = self.store.reputation_total(reaction.author).await?;
        info!(from = %reaction.reactor, to = %reaction.author, total, "Karma awarded");

        if let Some(channel) = self.notifications {
            let embed = Embed {
                author: Some(EMBED_AUTHOR.to_string()),
                description: announcement(reaction, total),
                colour: EMBED_COLOUR,
            };
            self.gateway
                .send_message(channel, OutgoingMessage::default().with_embed(embed))
                .await?;
        }

        Ok(Some(total))
    }
}

fn announcement(reaction: &KarmaReaction, total: i64) -> String {
    format!(
        "Well done <@{}>! <@{}> reacted to your post in <#{}> with {KARMA_EMOJI} which earned you a point.\n\nYou now have {total} karma!",
        reaction.author, reaction.reactor, reaction.channel
    )
}
