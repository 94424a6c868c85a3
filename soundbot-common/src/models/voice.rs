// File: soundbot-common/src/models/voice.rs

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use twilight_model::id::marker::{ChannelMarker, GuildMarker, UserMarker};
use twilight_model::id::Id;

pub type GuildId = Id<GuildMarker>;
pub type ChannelId = Id<ChannelMarker>;
pub type UserId = Id<UserMarker>;

/// Lifecycle of a single voice connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Signalling => "signalling",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Ready => "ready",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// Why the transport dropped to `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Discord closed the voice websocket with code 4014. The bot was either
    /// kicked from the channel or moved to another one; only the next few
    /// seconds tell which.
    ClosedByServer,
    /// Anything else: network loss, timeouts, other close codes.
    Other(String),
}

/// Events produced by the transport's audio player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Finished { resource_id: u64 },
    Errored { resource_id: u64, reason: String },
}

/// Everything a transport reports back to the session that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Signalling,
    Connecting,
    Ready,
    Disconnected(DisconnectCause),
    Destroyed,
    /// Non-fatal transport warning. Logged, never drives a transition by itself.
    Error(String),
    Player(PlayerEvent),
}

/// A member as seen by the command layer when asking the bot to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceMember {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// The voice channel the member currently sits in, if any.
    pub channel_id: Option<ChannelId>,
}

/// A playable instance of a stored sample. Lives for one `play()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioResource {
    pub id: u64,
    pub sample_id: String,
    pub path: PathBuf,
}

/// One voice-state change for one member of a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub is_bot: bool,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}
