// File: soundbot-core/src/voice/registry.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use soundbot_common::models::voice::{ConnectionStatus, GuildId, VoiceMember};
use soundbot_common::traits::voice_traits::VoiceConnector;

use crate::eventbus::{BotEvent, EventBus};
use crate::voice::config::VoiceConfig;
use crate::voice::subscription::{DestroyCallback, SessionOptions, SessionSubscription};
use crate::Error;

/// Maps each guild to its one voice session.
///
/// Entries are inserted by `join` and removed only by the session's own
/// destruction callback. Cloning is cheap and every clone sees the same map.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<GuildId, Arc<SessionSubscription>>,
    connector: Arc<dyn VoiceConnector>,
    config: VoiceConfig,
    event_bus: Option<EventBus>,
    next_session_id: AtomicU64,
    /// Number of live sessions, for shutdown draining.
    count_tx: watch::Sender<usize>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn VoiceConnector>, config: VoiceConfig) -> Self {
        Self::build(connector, config, None)
    }

    pub fn with_event_bus(connector: Arc<dyn VoiceConnector>, config: VoiceConfig, event_bus: EventBus) -> Self {
        Self::build(connector, config, Some(event_bus))
    }

    fn build(connector: Arc<dyn VoiceConnector>, config: VoiceConfig, event_bus: Option<EventBus>) -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                connector,
                config,
                event_bus,
                next_session_id: AtomicU64::new(1),
                count_tx,
            }),
        }
    }

    /// Get (or create) the session for the member's guild and wait until it
    /// is ready. A guild that already has a session shares it: every caller
    /// waits for the same connection and sees the same outcome.
    pub async fn join(&self, member: &VoiceMember) -> Result<Arc<SessionSubscription>, Error> {
        let guild_id = member.guild_id;
        if let Some(existing) = self.get(guild_id) {
            return self.reuse(existing).await;
        }

        let channel_id = member.channel_id.ok_or(Error::NotInVoiceChannel)?;

        let created = match self.inner.sessions.entry(guild_id) {
            // Lost a race with another join for the same guild.
            Entry::Occupied(entry) => Err(entry.get().clone()),
            Entry::Vacant(entry) => {
                let link = self.inner.connector.connect(guild_id, channel_id).map_err(|e| {
                    warn!("(SessionRegistry) guild {guild_id} => could not initiate connection: {e}");
                    Error::TryAgain
                })?;

                let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
                let subscription = SessionSubscription::new(
                    guild_id,
                    channel_id,
                    link,
                    removal_callback(Arc::downgrade(&self.inner), guild_id, session_id),
                    SessionOptions {
                        session_id,
                        config: self.inner.config.clone(),
                        event_bus: self.inner.event_bus.clone(),
                    },
                );
                entry.insert(subscription.clone());
                Ok(subscription)
            }
        };
        let subscription = match created {
            Ok(subscription) => subscription,
            Err(existing) => return self.reuse(existing).await,
        };
        self.inner.refresh_count();

        info!(
            "(SessionRegistry) guild {guild_id} => joining channel {channel_id} (session {})",
            subscription.session_id()
        );
        if let Some(bus) = &self.inner.event_bus {
            bus.publish(BotEvent::SessionCreated {
                guild_id,
                session_id: subscription.session_id(),
            })
            .await;
        }

        match subscription.wait_ready(self.inner.config.ready_timeout).await {
            Ok(()) => Ok(subscription),
            Err(e) => {
                warn!("(SessionRegistry) guild {guild_id} => not ready ({e}), giving up");
                // The destruction callback drops the registry entry.
                subscription.destroy().await;
                Err(Error::TryAgain)
            }
        }
    }

    /// Wait on a session another `join` created. Only the creator tears it
    /// down on failure; here a failure just means "try again".
    async fn reuse(&self, existing: Arc<SessionSubscription>) -> Result<Arc<SessionSubscription>, Error> {
        let guild_id = existing.guild_id();
        debug!("(SessionRegistry) guild {guild_id} => reusing session {}", existing.session_id());
        if existing.status() == ConnectionStatus::Ready {
            return Ok(existing);
        }
        match existing.wait_ready(self.inner.config.ready_timeout).await {
            Ok(()) => Ok(existing),
            Err(e) => {
                debug!("(SessionRegistry) guild {guild_id} => shared session not ready ({e})");
                Err(Error::TryAgain)
            }
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<SessionSubscription>> {
        self.inner.sessions.get(&guild_id).map(|s| s.value().clone())
    }

    pub fn has(&self, guild_id: GuildId) -> bool {
        self.inner.sessions.contains_key(&guild_id)
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.inner.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.inner.config
    }

    /// Resolves once no sessions are left.
    pub async fn await_all_destroyed(&self) {
        let mut rx = self.inner.count_tx.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Destroy every session, e.g. on shutdown.
    pub async fn destroy_all(&self) {
        let sessions: Vec<Arc<SessionSubscription>> =
            self.inner.sessions.iter().map(|e| e.value().clone()).collect();
        if sessions.is_empty() {
            return;
        }
        info!("(SessionRegistry) destroying {} session(s)", sessions.len());
        join_all(sessions.iter().map(|s| s.destroy())).await;
    }
}

impl RegistryInner {
    /// The count is read under the watch lock so a stale value can never
    /// overwrite a newer one.
    fn refresh_count(&self) {
        self.count_tx.send_modify(|n| *n = self.sessions.len());
    }
}

/// The callback a session runs when it reaches `Destroyed`. Only removes the
/// entry if it still belongs to that session; a newer session for the same
/// guild is left alone.
fn removal_callback(inner: Weak<RegistryInner>, guild_id: GuildId, session_id: u64) -> DestroyCallback {
    Box::new(move || {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let removed = inner
            .sessions
            .remove_if(&guild_id, |_, s| s.session_id() == session_id)
            .is_some();
        if !removed {
            return;
        }

        let mut remaining = 0;
        inner.count_tx.send_modify(|n| {
            *n = inner.sessions.len();
            remaining = *n;
        });
        info!("(SessionRegistry) guild {guild_id} => session {session_id} removed, {remaining} left");

        if let Some(bus) = inner.event_bus.clone() {
            tokio::spawn(async move {
                bus.publish(BotEvent::SessionRemoved { guild_id, session_id }).await;
                if remaining == 0 {
                    bus.publish(BotEvent::AllSessionsDestroyed).await;
                }
            });
        }
    })
}
