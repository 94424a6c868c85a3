use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use songbird::shards::TwilightMap;
use songbird::Songbird;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use twilight_cache_inmemory::{InMemoryCache, ResourceType};
use twilight_gateway::{self as gateway, CloseFrame, Config, Intents, Shard};
use twilight_http::client::ClientBuilder;

use soundbot_core::eventbus::event_logger::spawn_event_logger_task;
use soundbot_core::eventbus::{BotEvent, EventBus};
use soundbot_core::voice::{PresenceReconciler, SampleLibrary, SessionRegistry, VoiceConfig};

mod commands;
mod context;
mod discord;
mod voice_transport;

use context::BotContext;
use discord::CacheOccupancy;
use voice_transport::SongbirdConnector;

#[derive(Parser, Debug, Clone)]
#[command(name = "soundbot")]
#[command(author, version, about = "Soundbot - plays short sound clips in Discord voice channels")]
struct Args {
    /// Directory holding one audio file per sound
    #[arg(long, default_value = "sounds")]
    samples_dir: PathBuf,

    /// Prefix for text commands
    #[arg(long, default_value = "!")]
    command_prefix: String,

    /// Seconds a voice connection may take to become ready
    #[arg(long, default_value_t = 20)]
    ready_timeout_secs: u64,

    /// Seconds to wait for voice sessions to close on shutdown
    #[arg(long, default_value_t = 10)]
    shutdown_grace_secs: u64,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("soundbot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {e}");
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge `log` records: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!(
        "Soundbot starting. samples_dir={}, prefix='{}'",
        args.samples_dir.display(),
        args.command_prefix
    );

    if let Err(e) = run(args).await {
        error!("Fatal error: {e:?}");
        return Err(e);
    }
    info!("Main finished. Goodbye!");
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let token = std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?;

    // 1) HTTP client and our own identity
    let http = Arc::new(
        ClientBuilder::new()
            .token(token.clone())
            .timeout(Duration::from_secs(30))
            .build(),
    );
    let bot_user_id = http
        .current_user()
        .await
        .context("could not fetch the bot user")?
        .model()
        .await
        .context("could not decode the bot user")?
        .id;

    // 2) Shards, and songbird wired onto their senders
    let config = Config::new(
        token,
        Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT | Intents::GUILD_VOICE_STATES,
    );
    let shards: Vec<Shard> = gateway::create_recommended(&http, config, |_, b| b.build())
        .await
        .context("create_recommended error")?
        .collect();
    let senders: HashMap<u32, _> = shards.iter().map(|s| (s.id().number(), s.sender())).collect();
    let songbird = Arc::new(Songbird::twilight(Arc::new(TwilightMap::new(senders)), bot_user_id));

    let cache = Arc::new(
        InMemoryCache::builder()
            .resource_types(
                ResourceType::GUILD
                    | ResourceType::CHANNEL
                    | ResourceType::VOICE_STATE
                    | ResourceType::MEMBER
                    | ResourceType::USER,
            )
            .build(),
    );

    // 3) Event bus, voice sessions, presence
    let event_bus = EventBus::new();
    let logger_handle = spawn_event_logger_task(&event_bus, 1000).await;

    let voice_config = VoiceConfig::default().with_ready_timeout(Duration::from_secs(args.ready_timeout_secs));
    let registry = SessionRegistry::with_event_bus(
        Arc::new(SongbirdConnector::new(songbird.clone())),
        voice_config,
        event_bus.clone(),
    );
    let reconciler = PresenceReconciler::new(
        registry.clone(),
        bot_user_id,
        Arc::new(CacheOccupancy::new(cache.clone(), bot_user_id)),
    );

    let ctx = Arc::new(BotContext {
        http,
        cache,
        songbird,
        registry: registry.clone(),
        reconciler,
        library: SampleLibrary::new(args.samples_dir.clone()),
        event_bus: event_bus.clone(),
        command_prefix: args.command_prefix.clone(),
    });
    let (shard_tasks, shard_senders) = discord::spawn_shards(shards, ctx.clone());
    ctx.event_bus
        .publish(BotEvent::Notice(format!("{} shard(s) running", shard_tasks.len())))
        .await;

    // 4) Run until Ctrl-C
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e:?}");
    }
    info!("Ctrl-C detected; shutting down...");

    // 5) Leave every voice channel before the gateway goes away
    let grace = Duration::from_secs(args.shutdown_grace_secs);
    let drain = async {
        registry.destroy_all().await;
        registry.await_all_destroyed().await;
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("{} voice session(s) still open after {grace:?}", registry.len());
    }

    event_bus.shutdown();
    for sender in &shard_senders {
        let _ = sender.close(CloseFrame::NORMAL);
    }
    for task in shard_tasks {
        let _ = task.await;
    }
    let _ = logger_handle.await;

    info!("Shutdown complete.");
    Ok(())
}
