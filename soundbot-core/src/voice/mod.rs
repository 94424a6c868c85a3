// File: soundbot-core/src/voice/mod.rs
//
// Voice-session lifecycle: one connection state machine and one playback
// engine per guild, composed by a subscription and owned by the registry.

pub mod config;
pub mod connection;
pub mod playback;
pub mod presence;
pub mod registry;
pub mod sample;
pub mod subscription;

pub use config::VoiceConfig;
pub use connection::ConnectionState;
pub use playback::PlaybackEngine;
pub use presence::{Decision, DestroyReason, PresenceReconciler};
pub use registry::SessionRegistry;
pub use sample::{FileSample, SampleLibrary};
pub use subscription::SessionSubscription;
