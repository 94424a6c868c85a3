//! soundbot-server/src/context.rs
//!
//! Everything the gateway runner and the command handler share.

use std::sync::Arc;

use songbird::Songbird;
use twilight_cache_inmemory::InMemoryCache;
use twilight_http::Client as HttpClient;

use soundbot_core::eventbus::EventBus;
use soundbot_core::voice::{PresenceReconciler, SampleLibrary, SessionRegistry};

pub struct BotContext {
    pub http: Arc<HttpClient>,
    pub cache: Arc<InMemoryCache>,
    pub songbird: Arc<Songbird>,
    pub registry: SessionRegistry,
    pub reconciler: PresenceReconciler,
    pub library: SampleLibrary,
    pub event_bus: EventBus,
    pub command_prefix: String,
}
