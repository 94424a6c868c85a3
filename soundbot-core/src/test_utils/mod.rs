// File: soundbot-core/src/test_utils/mod.rs
//
// Scriptable in-memory transport used by the tests in this crate and by
// anything downstream that wants to exercise the registry without Discord.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::time::Instant;

use soundbot_common::models::voice::{
    AudioResource, ChannelId, DisconnectCause, GuildId, TransportEvent,
};
use soundbot_common::traits::voice_traits::{TransportLink, VoiceConnector, VoiceTransport};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Report signalling, connecting and ready straight away.
    Ready,
    /// Report signalling and connecting, then nothing.
    Stall,
    /// `connect` itself fails.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejoinBehavior {
    Recover,
    /// Every rejoin ends in another recoverable disconnect.
    Fail,
    Silent,
}

pub struct FakeTransport {
    events: UnboundedSender<TransportEvent>,
    rejoin_behavior: RejoinBehavior,
    rejoins: Mutex<Vec<(ChannelId, Instant)>>,
    plays: Mutex<Vec<AudioResource>>,
    stops: AtomicUsize,
    destroys: AtomicUsize,
}

impl FakeTransport {
    /// Push an event as if the real transport had reported it.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn rejoins(&self) -> Vec<(ChannelId, Instant)> {
        self.rejoins.lock().clone()
    }

    pub fn played(&self) -> Vec<String> {
        self.plays.lock().iter().map(|r| r.sample_id.clone()).collect()
    }

    pub fn last_resource(&self) -> Option<AudioResource> {
        self.plays.lock().last().cloned()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn rejoin(&self, channel_id: ChannelId) -> Result<(), Error> {
        self.rejoins.lock().push((channel_id, Instant::now()));
        match self.rejoin_behavior {
            RejoinBehavior::Recover => {
                self.emit(TransportEvent::Signalling);
                self.emit(TransportEvent::Connecting);
                self.emit(TransportEvent::Ready);
            }
            RejoinBehavior::Fail => {
                self.emit(TransportEvent::Signalling);
                self.emit(TransportEvent::Disconnected(DisconnectCause::Other(
                    "rejoin failed".into(),
                )));
            }
            RejoinBehavior::Silent => {}
        }
        Ok(())
    }

    async fn play(&self, resource: &AudioResource) -> Result<(), Error> {
        self.plays.lock().push(resource.clone());
        Ok(())
    }

    async fn stop_audio(&self) -> Result<(), Error> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), Error> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    connect_behavior: ConnectBehavior,
    rejoin_behavior: RejoinBehavior,
    connects: AtomicUsize,
    transports: Mutex<HashMap<GuildId, Arc<FakeTransport>>>,
}

impl FakeConnector {
    pub fn new(connect_behavior: ConnectBehavior) -> Self {
        Self {
            connect_behavior,
            rejoin_behavior: RejoinBehavior::Recover,
            connects: AtomicUsize::new(0),
            transports: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_rejoin(mut self, rejoin_behavior: RejoinBehavior) -> Self {
        self.rejoin_behavior = rejoin_behavior;
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The most recent transport handed out for `guild_id`.
    pub fn transport(&self, guild_id: GuildId) -> Option<Arc<FakeTransport>> {
        self.transports.lock().get(&guild_id).cloned()
    }
}

impl VoiceConnector for FakeConnector {
    fn connect(&self, guild_id: GuildId, _channel_id: ChannelId) -> Result<TransportLink, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.connect_behavior == ConnectBehavior::Fail {
            return Err(Error::Transport("gateway unavailable".into()));
        }

        let (tx, rx) = unbounded_channel();
        let transport = Arc::new(FakeTransport {
            events: tx,
            rejoin_behavior: self.rejoin_behavior,
            rejoins: Mutex::new(Vec::new()),
            plays: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        });

        transport.emit(TransportEvent::Signalling);
        transport.emit(TransportEvent::Connecting);
        if self.connect_behavior == ConnectBehavior::Ready {
            transport.emit(TransportEvent::Ready);
        }

        self.transports.lock().insert(guild_id, transport.clone());
        Ok(TransportLink {
            transport,
            events: rx,
        })
    }
}
