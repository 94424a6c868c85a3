//! src/eventbus/event_logger.rs
//!
//! Spawns a task that subscribes to the EventBus and writes every voice event
//! to the tracing log as a JSON line. Drains the queue on shutdown.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::eventbus::{BotEvent, EventBus};

/// Spawns the logger and returns its `JoinHandle` so shutdown code can
/// `.await` the final drain.
pub async fn spawn_event_logger_task(event_bus: &EventBus, buffer_size: usize) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe(Some(buffer_size)).await;
    let mut shutdown_rx = event_bus.shutdown_rx.clone();

    tokio::spawn(async move {
        info!("(EventLogger) started with buffer_size={buffer_size}");

        loop {
            tokio::select! {
                biased;
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => log_event(&event),
                        None => {
                            info!("(EventLogger) channel closed => break from loop.");
                            break;
                        }
                    }
                },
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("(EventLogger) shutting down => break from loop.");
                        break;
                    }
                },
            }
        }

        let drained = drain(&mut rx);
        info!("(EventLogger) exited after draining {drained} event(s).");
    })
}

fn drain(rx: &mut mpsc::Receiver<BotEvent>) -> usize {
    let mut n = 0;
    while let Ok(event) = rx.try_recv() {
        log_event(&event);
        n += 1;
    }
    n
}

fn log_event(event: &BotEvent) {
    match serde_json::to_string(event) {
        Ok(json) => match event {
            BotEvent::VoiceStatus { .. } | BotEvent::Playback { .. } => {
                debug!(target: "soundbot::events", kind = event.event_type(), "{json}")
            }
            _ => info!(target: "soundbot::events", kind = event.event_type(), "{json}"),
        },
        Err(e) => warn!("(EventLogger) could not serialize {}: {e}", event.event_type()),
    }
}
