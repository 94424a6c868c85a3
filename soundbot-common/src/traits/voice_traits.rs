// File: soundbot-common/src/traits/voice_traits.rs

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Error;
use crate::models::voice::{AudioResource, ChannelId, GuildId, TransportEvent};

/// Handle onto one live voice connection.
///
/// Implementations report progress through the `TransportEvent` stream handed
/// out by [`VoiceConnector::connect`]; the methods here only issue requests.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Re-establish the connection to `channel_id` after a disconnect.
    async fn rejoin(&self, channel_id: ChannelId) -> Result<(), Error>;

    /// Start playing `resource`. The transport-level player holds exactly one
    /// resource, so this replaces whatever it was playing.
    async fn play(&self, resource: &AudioResource) -> Result<(), Error>;

    async fn stop_audio(&self) -> Result<(), Error>;

    /// Leave the channel and release the connection. Called at most once per
    /// session, but must tolerate an already-closed connection.
    async fn destroy(&self) -> Result<(), Error>;
}

/// A freshly initiated connection: the handle plus its event stream.
pub struct TransportLink {
    pub transport: Arc<dyn VoiceTransport>,
    pub events: UnboundedReceiver<TransportEvent>,
}

pub trait VoiceConnector: Send + Sync {
    /// Begin connecting to a voice channel. Returns immediately; the link's
    /// event stream reports `Signalling`, `Connecting` and `Ready` as the
    /// connection progresses.
    fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<TransportLink, Error>;
}

/// A stored audio clip, however the store fetched it.
#[async_trait]
pub trait Sample: Send + Sync {
    fn id(&self) -> &str;

    /// Resolve the clip to a readable file in a playable container.
    async fn open(&self) -> Result<PathBuf, Error>;
}

/// Answers "how many humans are in this voice channel right now".
pub trait ChannelOccupancy: Send + Sync {
    fn human_count(&self, guild_id: GuildId, channel_id: ChannelId) -> usize;
}
