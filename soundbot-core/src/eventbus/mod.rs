//! soundbot-core/src/eventbus/mod.rs
//!
//! Fan-out of voice lifecycle events. Every subscriber owns a bounded queue,
//! so a slow consumer slows publishers down instead of losing events.

pub mod event_logger;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};

use soundbot_common::models::voice::{ConnectionStatus, GuildId, PlaybackState};

/// Voice lifecycle events that the rest of the bot can observe.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BotEvent {
    /// The connection for a guild changed status.
    VoiceStatus {
        guild_id: GuildId,
        status: ConnectionStatus,
        at: DateTime<Utc>,
    },

    /// Playback started or stopped in a guild.
    Playback {
        guild_id: GuildId,
        state: PlaybackState,
        sample_id: Option<String>,
    },

    SessionCreated {
        guild_id: GuildId,
        session_id: u64,
    },

    SessionRemoved {
        guild_id: GuildId,
        session_id: u64,
    },

    /// The registry became empty.
    AllSessionsDestroyed,

    /// Free-form operational note (startup, shutdown).
    Notice(String),
}

impl BotEvent {
    /// Dotted name used as the log key.
    pub fn event_type(&self) -> &'static str {
        match self {
            BotEvent::VoiceStatus { .. } => "voice.status",
            BotEvent::Playback { .. } => "voice.playback",
            BotEvent::SessionCreated { .. } => "session.created",
            BotEvent::SessionRemoved { .. } => "session.removed",
            BotEvent::AllSessionsDestroyed => "session.all_destroyed",
            BotEvent::Notice(_) => "notice",
        }
    }

    pub fn guild_id(&self) -> Option<GuildId> {
        if let BotEvent::VoiceStatus { guild_id, .. }
        | BotEvent::Playback { guild_id, .. }
        | BotEvent::SessionCreated { guild_id, .. }
        | BotEvent::SessionRemoved { guild_id, .. } = self
        {
            Some(*guild_id)
        } else {
            None
        }
    }
}

/// Queue length a subscriber gets when it does not ask for one.
const DEFAULT_QUEUE_LEN: usize = 10_000;

/// Cheap to clone; every clone publishes to the same subscribers and shares
/// one shutdown flag.
#[derive(Clone)]
pub struct EventBus {
    queues: Arc<Mutex<Vec<mpsc::Sender<BotEvent>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl EventBus {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            queues: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Flip the shutdown flag. Consumers watching `shutdown_rx` drain and exit.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub async fn subscribe(&self, queue_len: Option<usize>) -> mpsc::Receiver<BotEvent> {
        let (tx, rx) = mpsc::channel(queue_len.unwrap_or(DEFAULT_QUEUE_LEN));
        self.queues.lock().await.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, waiting on full queues.
    /// Subscribers whose receiver is gone are dropped from the list.
    pub async fn publish(&self, event: BotEvent) {
        let live: Vec<mpsc::Sender<BotEvent>> = {
            let mut queues = self.queues.lock().await;
            queues.retain(|q| !q.is_closed());
            queues.clone()
        };
        for queue in live {
            // Closed between the snapshot and now; pruned next time.
            let _ = queue.send(event.clone()).await;
        }
    }

    pub async fn publish_status(&self, guild_id: GuildId, status: ConnectionStatus) {
        self.publish(BotEvent::VoiceStatus {
            guild_id,
            status,
            at: Utc::now(),
        })
        .await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
