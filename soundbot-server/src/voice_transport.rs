// File: soundbot-server/src/voice_transport.rs
//
// Songbird-backed implementation of the voice transport traits. Each guild
// gets one songbird `Call`; its driver events are translated into
// `TransportEvent`s for the session that owns the connection.

use std::sync::Arc;

use async_trait::async_trait;
use songbird::events::context_data::DisconnectReason;
use songbird::events::{CoreEvent, Event, EventContext, EventHandler, TrackEvent};
use songbird::input::File as FileInput;
use songbird::model::CloseCode;
use songbird::tracks::PlayMode;
use songbird::Songbird;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, info, warn};

use soundbot_common::error::Error;
use soundbot_common::models::voice::{
    AudioResource, ChannelId, DisconnectCause, GuildId, PlayerEvent, TransportEvent,
};
use soundbot_common::traits::voice_traits::{TransportLink, VoiceConnector, VoiceTransport};

pub struct SongbirdConnector {
    songbird: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self { songbird }
    }
}

impl VoiceConnector for SongbirdConnector {
    fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<TransportLink, Error> {
        let (events, rx) = unbounded_channel();
        let transport = Arc::new(SongbirdTransport {
            songbird: self.songbird.clone(),
            guild_id,
            events,
        });

        transport.emit(TransportEvent::Signalling);
        let opening = transport.clone();
        tokio::spawn(async move { opening.open(channel_id).await });

        Ok(TransportLink { transport, events: rx })
    }
}

pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    guild_id: GuildId,
    events: UnboundedSender<TransportEvent>,
}

impl SongbirdTransport {
    fn emit(&self, event: TransportEvent) {
        // The session may already be gone; nothing to report to then.
        let _ = self.events.send(event);
    }

    async fn open(&self, channel_id: ChannelId) {
        {
            let call = self.songbird.get_or_insert(self.guild_id);
            let mut call = call.lock().await;
            call.remove_all_global_events();
            for kind in [CoreEvent::DriverConnect, CoreEvent::DriverReconnect, CoreEvent::DriverDisconnect] {
                call.add_global_event(
                    Event::Core(kind),
                    DriverEvents {
                        events: self.events.clone(),
                    },
                );
            }
        }

        self.emit(TransportEvent::Connecting);
        match self.songbird.join(self.guild_id, channel_id).await {
            Ok(_) => {
                info!("(SongbirdTransport) guild {} => joined channel {channel_id}", self.guild_id);
                self.emit(TransportEvent::Ready);
            }
            Err(e) => {
                warn!("(SongbirdTransport) guild {} => join failed: {e}", self.guild_id);
                if let Err(e) = self.songbird.remove(self.guild_id).await {
                    debug!("(SongbirdTransport) guild {} => cleanup after failed join: {e}", self.guild_id);
                }
                self.emit(TransportEvent::Destroyed);
            }
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn rejoin(&self, channel_id: ChannelId) -> Result<(), Error> {
        self.emit(TransportEvent::Connecting);

        // Joining can take seconds; progress comes back as events.
        let songbird = self.songbird.clone();
        let events = self.events.clone();
        let guild_id = self.guild_id;
        tokio::spawn(async move {
            let event = match songbird.join(guild_id, channel_id).await {
                Ok(_) => TransportEvent::Ready,
                Err(e) => TransportEvent::Disconnected(DisconnectCause::Other(format!("rejoin failed: {e}"))),
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    async fn play(&self, resource: &AudioResource) -> Result<(), Error> {
        let call = self
            .songbird
            .get(self.guild_id)
            .ok_or_else(|| Error::Transport(format!("no voice call for guild {}", self.guild_id)))?;
        let mut call = call.lock().await;

        let handle = call.play_only_input(FileInput::new(resource.path.clone()).into());
        for kind in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(kind),
                    TrackEvents {
                        resource_id: resource.id,
                        events: self.events.clone(),
                    },
                )
                .map_err(|e| Error::Playback(format!("could not watch track: {e}")))?;
        }
        debug!("(SongbirdTransport) guild {} => playing {}", self.guild_id, resource.path.display());
        Ok(())
    }

    async fn stop_audio(&self) -> Result<(), Error> {
        if let Some(call) = self.songbird.get(self.guild_id) {
            call.lock().await.stop();
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), Error> {
        match self.songbird.remove(self.guild_id).await {
            Ok(()) => Ok(()),
            Err(songbird::error::JoinError::NoCall) => Ok(()),
            Err(e) => Err(Error::Transport(format!("leave failed: {e}"))),
        }
    }
}

/// 4014 means "kicked or moved"; anything else is a plain disconnect.
fn disconnect_cause(reason: Option<&DisconnectReason>) -> DisconnectCause {
    match reason {
        Some(DisconnectReason::WsClosed(Some(CloseCode::Disconnected))) => DisconnectCause::ClosedByServer,
        Some(other) => DisconnectCause::Other(format!("{other:?}")),
        None => DisconnectCause::Other("driver disconnected".into()),
    }
}

#[derive(Clone)]
struct DriverEvents {
    events: UnboundedSender<TransportEvent>,
}

#[async_trait]
impl EventHandler for DriverEvents {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let event = match ctx {
            EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => TransportEvent::Ready,
            EventContext::DriverDisconnect(data) => {
                TransportEvent::Disconnected(disconnect_cause(data.reason.as_ref()))
            }
            _ => return None,
        };
        let _ = self.events.send(event);
        None
    }
}

struct TrackEvents {
    resource_id: u64,
    events: UnboundedSender<TransportEvent>,
}

#[async_trait]
impl EventHandler for TrackEvents {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(tracks) = ctx else {
            return None;
        };
        let errored = tracks.iter().find_map(|(state, _)| match &state.playing {
            PlayMode::Errored(e) => Some(e.to_string()),
            _ => None,
        });

        let event = match errored {
            Some(reason) => PlayerEvent::Errored {
                resource_id: self.resource_id,
                reason,
            },
            None => PlayerEvent::Finished {
                resource_id: self.resource_id,
            },
        };
        let _ = self.events.send(TransportEvent::Player(event));
        // One-shot: the track is done either way.
        Some(Event::Cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_4014_is_closed_by_server() {
        let reason = DisconnectReason::WsClosed(Some(CloseCode::Disconnected));
        assert_eq!(disconnect_cause(Some(&reason)), DisconnectCause::ClosedByServer);
    }

    #[test]
    fn test_other_closes_are_plain_disconnects() {
        let reason = DisconnectReason::WsClosed(Some(CloseCode::SessionTimeout));
        assert!(matches!(disconnect_cause(Some(&reason)), DisconnectCause::Other(_)));
        assert!(matches!(disconnect_cause(Some(&DisconnectReason::TimedOut)), DisconnectCause::Other(_)));
        assert!(matches!(disconnect_cause(None), DisconnectCause::Other(_)));
    }
}
