// File: soundbot-server/src/discord.rs
//
// Shard runners: keep the cache current, feed songbird its voice events and
// route voice-state changes and chat commands to the right place.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use twilight_cache_inmemory::InMemoryCache;
use twilight_gateway::{Event, EventTypeFlags, MessageSender, Shard, StreamExt};
use twilight_model::gateway::payload::incoming::VoiceStateUpdate;

use soundbot_common::models::voice::{ChannelId, GuildId, PresenceChange, UserId};
use soundbot_common::traits::voice_traits::ChannelOccupancy;

use crate::commands;
use crate::context::BotContext;

/// Spawn one runner per shard. Returns the tasks and the senders used to
/// close the shards on shutdown.
pub fn spawn_shards(
    shards: impl IntoIterator<Item = Shard>,
    ctx: Arc<BotContext>,
) -> (Vec<JoinHandle<()>>, Vec<MessageSender>) {
    let mut tasks = Vec::new();
    let mut senders = Vec::new();
    for shard in shards {
        senders.push(shard.sender());
        tasks.push(tokio::spawn(shard_runner(shard, ctx.clone())));
    }
    (tasks, senders)
}

async fn shard_runner(mut shard: Shard, ctx: Arc<BotContext>) {
    let shard_id = shard.id().number();
    info!("(ShardRunner) Shard {shard_id} started. Listening for events.");

    while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
        let event = match item {
            Ok(event) => event,
            Err(err) => {
                warn!("(ShardRunner) Shard {shard_id} => error receiving event: {err:?}");
                continue;
            }
        };

        // The previous channel is only known before the cache applies the update.
        let presence = match &event {
            Event::VoiceStateUpdate(update) => presence_change(&ctx.cache, update),
            _ => None,
        };

        ctx.cache.update(&event);
        ctx.songbird.process(&event).await;

        match event {
            Event::Ready(ready) => {
                info!(
                    "(ShardRunner) Shard {shard_id} => READY as {} (ID={}), {} guild(s)",
                    ready.user.name,
                    ready.user.id,
                    ready.guilds.len()
                );
            }
            Event::VoiceStateUpdate(_) => {
                if let Some(change) = presence {
                    let reconciler = ctx.reconciler.clone();
                    tokio::spawn(async move {
                        reconciler.handle(&change).await;
                    });
                }
            }
            Event::ChannelDelete(deleted) => {
                if let Some(guild_id) = deleted.guild_id {
                    let reconciler = ctx.reconciler.clone();
                    let channel_id = deleted.id;
                    tokio::spawn(async move {
                        reconciler.handle_channel_delete(guild_id, channel_id).await;
                    });
                }
            }
            Event::MessageCreate(msg) => {
                if msg.author.bot {
                    trace!("(ShardRunner) ignoring bot message from {}", msg.author.name);
                    continue;
                }
                tokio::spawn(commands::handle_message(ctx.clone(), msg));
            }
            Event::GatewayClose(frame) => {
                debug!("(ShardRunner) Shard {shard_id} => gateway closed: {frame:?}");
            }
            other => {
                trace!("(ShardRunner) Shard {shard_id} => unhandled event: {:?}", other.kind());
            }
        }
    }

    warn!("(ShardRunner) Shard {shard_id} event loop ended.");
}

fn presence_change(cache: &InMemoryCache, update: &VoiceStateUpdate) -> Option<PresenceChange> {
    let state = &update.0;
    let guild_id = state.guild_id?;
    let old_channel = cache
        .voice_state(state.user_id, guild_id)
        .map(|cached| cached.channel_id());

    Some(PresenceChange {
        guild_id,
        user_id: state.user_id,
        is_bot: state.member.as_ref().is_some_and(|m| m.user.bot),
        old_channel,
        new_channel: state.channel_id,
    })
}

/// Human headcount straight from the gateway cache.
pub struct CacheOccupancy {
    cache: Arc<InMemoryCache>,
    bot_user_id: UserId,
}

impl CacheOccupancy {
    pub fn new(cache: Arc<InMemoryCache>, bot_user_id: UserId) -> Self {
        Self { cache, bot_user_id }
    }

    fn is_bot(&self, user_id: UserId) -> bool {
        user_id == self.bot_user_id || self.cache.user(user_id).is_some_and(|user| user.bot)
    }
}

impl ChannelOccupancy for CacheOccupancy {
    fn human_count(&self, _guild_id: GuildId, channel_id: ChannelId) -> usize {
        let Some(states) = self.cache.voice_channel_states(channel_id) else {
            return 0;
        };
        states.filter(|state| !self.is_bot(state.user_id())).count()
    }
}
