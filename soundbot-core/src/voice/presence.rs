// File: soundbot-core/src/voice/presence.rs

use std::sync::Arc;

use tracing::{debug, info};

use soundbot_common::models::voice::{ChannelId, GuildId, PresenceChange, UserId};
use soundbot_common::traits::voice_traits::ChannelOccupancy;

use crate::voice::registry::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The bot's own voice state lost its channel: kicked or disconnected.
    LeftChannel,
    /// No humans left in the bot's channel.
    ChannelEmpty,
    ChannelDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ignore,
    /// The bot was moved and the new channel still has people in it.
    UpdateChannel(ChannelId),
    Destroy(DestroyReason),
}

/// What to do with a guild's session after a voice-state change.
/// `session_channel` is `None` when the guild has no session.
pub fn decide(
    bot_user_id: UserId,
    session_channel: Option<ChannelId>,
    change: &PresenceChange,
    occupancy: &dyn ChannelOccupancy,
) -> Decision {
    let Some(mut bot_channel) = session_channel else {
        return Decision::Ignore;
    };
    let mut moved = false;

    if change.user_id == bot_user_id {
        match (change.old_channel, change.new_channel) {
            (Some(_), None) => return Decision::Destroy(DestroyReason::LeftChannel),
            (_, Some(new)) if new != bot_channel => {
                bot_channel = new;
                moved = true;
            }
            _ => {}
        }
    }

    if occupancy.human_count(change.guild_id, bot_channel) == 0 {
        return Decision::Destroy(DestroyReason::ChannelEmpty);
    }
    if moved {
        Decision::UpdateChannel(bot_channel)
    } else {
        Decision::Ignore
    }
}

/// Applies `decide` to live sessions. Only ever destroys or updates an
/// existing session, never creates one.
#[derive(Clone)]
pub struct PresenceReconciler {
    registry: SessionRegistry,
    bot_user_id: UserId,
    occupancy: Arc<dyn ChannelOccupancy>,
}

impl PresenceReconciler {
    pub fn new(registry: SessionRegistry, bot_user_id: UserId, occupancy: Arc<dyn ChannelOccupancy>) -> Self {
        Self {
            registry,
            bot_user_id,
            occupancy,
        }
    }

    pub async fn handle(&self, change: &PresenceChange) -> Decision {
        let Some(session) = self.registry.get(change.guild_id) else {
            return Decision::Ignore;
        };

        let decision = decide(
            self.bot_user_id,
            Some(session.channel_id()),
            change,
            self.occupancy.as_ref(),
        );
        match decision {
            Decision::Ignore => {}
            Decision::UpdateChannel(channel_id) => {
                info!("(PresenceReconciler) guild {} => bot moved to {channel_id}", change.guild_id);
                session.set_channel(channel_id);
            }
            Decision::Destroy(reason) => {
                info!("(PresenceReconciler) guild {} => destroying session ({reason:?})", change.guild_id);
                session.destroy().await;
            }
        }
        decision
    }

    pub async fn handle_channel_delete(&self, guild_id: GuildId, channel_id: ChannelId) -> Decision {
        match self.registry.get(guild_id) {
            Some(session) if session.channel_id() == channel_id => {
                info!("(PresenceReconciler) guild {guild_id} => voice channel {channel_id} deleted");
                session.destroy().await;
                Decision::Destroy(DestroyReason::ChannelDeleted)
            }
            _ => {
                debug!("(PresenceReconciler) guild {guild_id} => channel {channel_id} deleted, no session there");
                Decision::Ignore
            }
        }
    }
}
