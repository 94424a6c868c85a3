// File: soundbot-core/src/voice/subscription.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use soundbot_common::models::voice::{
    AudioResource, ChannelId, ConnectionStatus, GuildId, PlaybackState, TransportEvent,
};
use soundbot_common::traits::voice_traits::{Sample, TransportLink, VoiceTransport};

use crate::eventbus::{BotEvent, EventBus};
use crate::voice::config::VoiceConfig;
use crate::voice::connection::{Action, ConnectionState, Input, Timer, TransportStatus};
use crate::voice::playback::PlaybackEngine;
use crate::Error;

/// Invoked exactly once when the session reaches `Destroyed`.
pub type DestroyCallback = Box<dyn FnOnce() + Send + Sync + 'static>;

pub struct SessionOptions {
    pub session_id: u64,
    pub config: VoiceConfig,
    pub event_bus: Option<EventBus>,
}

enum Command {
    Play {
        resource: AudioResource,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Stop {
        force: bool,
        reply: oneshot::Sender<bool>,
    },
    Destroy,
}

/// One guild's voice session: a connection state machine and a playback
/// engine, both owned by a driver task that handles every input in order.
/// This struct is the handle the rest of the bot talks to.
pub struct SessionSubscription {
    guild_id: GuildId,
    session_id: u64,
    channel_id: Arc<RwLock<ChannelId>>,
    commands: UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    playback_rx: watch::Receiver<PlaybackState>,
}

impl SessionSubscription {
    /// Wrap an already-initiated transport and spawn its driver.
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        link: TransportLink,
        on_destroy: DestroyCallback,
        options: SessionOptions,
    ) -> Arc<Self> {
        let (commands_tx, commands_rx) = unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Signalling);
        let channel_id = Arc::new(RwLock::new(channel_id));

        let engine = PlaybackEngine::new(link.transport.clone());
        let playback_rx = engine.subscribe();

        let driver = SessionDriver {
            guild_id,
            channel_id: channel_id.clone(),
            machine: ConnectionState::new(options.config),
            engine,
            transport: link.transport,
            timers: Timers::default(),
            status_tx,
            on_destroy: Some(on_destroy),
            event_bus: options.event_bus,
        };
        tokio::spawn(driver.run(commands_rx, link.events));

        Arc::new(Self {
            guild_id,
            session_id: options.session_id,
            channel_id,
            commands: commands_tx,
            status_rx,
            playback_rx,
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn channel_id(&self) -> ChannelId {
        *self.channel_id.read()
    }

    /// Record that the bot now sits in another channel; later rejoins target it.
    pub fn set_channel(&self, channel_id: ChannelId) {
        let mut guard = self.channel_id.write();
        if *guard != channel_id {
            debug!("(SessionSubscription) guild {} moved {} => {}", self.guild_id, *guard, channel_id);
            *guard = channel_id;
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn is_destroyed(&self) -> bool {
        self.status() == ConnectionStatus::Destroyed
    }

    pub fn playback_state(&self) -> PlaybackState {
        *self.playback_rx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Play `sample`, replacing anything already playing. Resource creation
    /// and transport errors come back to the caller.
    pub async fn play(&self, sample: &dyn Sample) -> Result<AudioResource, Error> {
        if self.is_destroyed() {
            return Err(Error::SessionClosed);
        }
        let resource = PlaybackEngine::create_resource(sample).await?;

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Play { resource: resource.clone(), reply })
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)??;
        Ok(resource)
    }

    /// Stop audio only; the connection stays up. Returns whether anything was playing.
    pub async fn stop(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { force: true, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Tear the session down and wait until it is `Destroyed`. Safe to call
    /// any number of times, from any number of places.
    pub async fn destroy(&self) {
        let _ = self.commands.send(Command::Destroy);
        self.destroyed().await;
    }

    /// Resolves once the session is `Destroyed`, whoever destroyed it.
    pub async fn destroyed(&self) {
        let mut rx = self.status_rx.clone();
        let _ = rx.wait_for(|s| *s == ConnectionStatus::Destroyed).await;
    }

    /// Wait for `Ready`. Fails early with `SessionClosed` if the session is
    /// destroyed first, or with `Timeout` once `timeout` has passed.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), Error> {
        let mut rx = self.status_rx.clone();
        let reached = tokio::time::timeout(timeout, async move {
            rx.wait_for(|s| matches!(s, ConnectionStatus::Ready | ConnectionStatus::Destroyed))
                .await
                .map(|s| *s)
        })
        .await?;

        match reached {
            Ok(ConnectionStatus::Ready) => Ok(()),
            _ => Err(Error::SessionClosed),
        }
    }
}

#[derive(Default)]
struct Timers {
    deadlines: HashMap<Timer, Instant>,
}

impl Timers {
    fn arm(&mut self, timer: Timer, after: Duration) {
        self.deadlines.insert(timer, Instant::now() + after);
    }

    fn cancel(&mut self, timer: Timer) {
        self.deadlines.remove(&timer);
    }

    fn next(&self) -> Option<(Timer, Instant)> {
        self.deadlines
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(timer, at)| (*timer, *at))
    }
}

async fn wait_for_timer(next: Option<(Timer, Instant)>) -> Option<Timer> {
    match next {
        Some((timer, at)) => {
            tokio::time::sleep_until(at).await;
            Some(timer)
        }
        None => std::future::pending().await,
    }
}

struct SessionDriver {
    guild_id: GuildId,
    channel_id: Arc<RwLock<ChannelId>>,
    machine: ConnectionState,
    engine: PlaybackEngine,
    transport: Arc<dyn VoiceTransport>,
    timers: Timers,
    status_tx: watch::Sender<ConnectionStatus>,
    on_destroy: Option<DestroyCallback>,
    event_bus: Option<EventBus>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut events: UnboundedReceiver<TransportEvent>,
    ) {
        info!("(SessionDriver) guild {} => started", self.guild_id);
        let initial = self.machine.start();
        self.apply(initial).await;
        self.publish_status(ConnectionStatus::Signalling).await;

        while self.machine.status() != ConnectionStatus::Destroyed {
            let next_timer = self.timers.next();
            tokio::select! {
                biased;
                ev = events.recv() => match ev {
                    Some(ev) => self.on_transport_event(ev).await,
                    None => {
                        debug!("(SessionDriver) guild {} => transport event stream ended", self.guild_id);
                        self.step(Input::Transport(TransportStatus::Destroyed)).await;
                    }
                },
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => self.step(Input::DestroyRequested).await,
                },
                Some(timer) = wait_for_timer(next_timer) => {
                    self.timers.cancel(timer);
                    self.step(Input::TimerFired(timer)).await;
                }
            }
        }

        // Anything queued behind the teardown gets a closed answer.
        commands.close();
        while let Ok(cmd) = commands.try_recv() {
            match cmd {
                Command::Play { reply, .. } => {
                    let _ = reply.send(Err(Error::SessionClosed));
                }
                Command::Stop { reply, .. } => {
                    let _ = reply.send(false);
                }
                Command::Destroy => {}
            }
        }
        info!("(SessionDriver) guild {} => finished", self.guild_id);
    }

    async fn step(&mut self, input: Input) {
        let before = self.machine.status();
        let actions = self.machine.handle(input);
        self.apply(actions).await;

        let after = self.machine.status();
        if after != before {
            self.publish_status(after).await;
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::ArmTimer(timer, after) => self.timers.arm(timer, after),
                Action::CancelTimer(timer) => self.timers.cancel(timer),
                Action::Rejoin => {
                    let channel_id = *self.channel_id.read();
                    info!("(SessionDriver) guild {} => rejoining channel {channel_id}", self.guild_id);
                    // A failed request leaves us signalling; the ready deadline cleans up.
                    if let Err(e) = self.transport.rejoin(channel_id).await {
                        warn!("(SessionDriver) guild {} => rejoin request failed: {e}", self.guild_id);
                    }
                }
                Action::DestroyTransport => {
                    if let Err(e) = self.transport.destroy().await {
                        warn!("(SessionDriver) guild {} => transport destroy failed: {e}", self.guild_id);
                    }
                }
                Action::Teardown => self.teardown().await,
            }
        }
    }

    async fn teardown(&mut self) {
        self.timers.deadlines.clear();
        if self.engine.stop(true).await {
            self.publish_playback(PlaybackState::Idle, None).await;
        }
        if let Some(callback) = self.on_destroy.take() {
            callback();
        }
        info!("(SessionDriver) guild {} => destroyed", self.guild_id);
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        let input = match event {
            TransportEvent::Signalling => TransportStatus::Signalling,
            TransportEvent::Connecting => TransportStatus::Connecting,
            TransportEvent::Ready => TransportStatus::Ready,
            TransportEvent::Disconnected(cause) => TransportStatus::Disconnected(cause),
            TransportEvent::Destroyed => TransportStatus::Destroyed,
            TransportEvent::Error(message) => {
                warn!("(SessionDriver) guild {} => transport error: {message}", self.guild_id);
                return;
            }
            TransportEvent::Player(player_event) => {
                if let Some(state) = self.engine.on_player_event(player_event) {
                    self.publish_playback(state, None).await;
                }
                return;
            }
        };
        self.step(Input::Transport(input)).await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Play { resource, reply } => {
                let sample_id = resource.sample_id.clone();
                let result = self.engine.play(resource).await;
                if result.is_ok() {
                    self.publish_playback(PlaybackState::Playing, Some(sample_id)).await;
                }
                let _ = reply.send(result);
            }
            Command::Stop { force, reply } => {
                let stopped = self.engine.stop(force).await;
                if stopped {
                    self.publish_playback(PlaybackState::Idle, None).await;
                }
                let _ = reply.send(stopped);
            }
            Command::Destroy => self.step(Input::DestroyRequested).await,
        }
    }

    async fn publish_status(&self, status: ConnectionStatus) {
        debug!("(SessionDriver) guild {} => {status}", self.guild_id);
        self.status_tx.send_replace(status);
        if let Some(bus) = &self.event_bus {
            bus.publish_status(self.guild_id, status).await;
        }
    }

    async fn publish_playback(&self, state: PlaybackState, sample_id: Option<String>) {
        if let Some(bus) = &self.event_bus {
            bus.publish(BotEvent::Playback {
                guild_id: self.guild_id,
                state,
                sample_id,
            })
            .await;
        }
    }
}
