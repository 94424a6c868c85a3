// File: soundbot-core/src/voice/playback.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use soundbot_common::models::voice::{AudioResource, PlaybackState, PlayerEvent};
use soundbot_common::traits::voice_traits::{Sample, VoiceTransport};

use crate::Error;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Single-resource player on top of one transport. No queue: a new `play`
/// pre-empts whatever is playing.
pub struct PlaybackEngine {
    transport: Arc<dyn VoiceTransport>,
    current: Option<AudioResource>,
    state_tx: watch::Sender<PlaybackState>,
}

impl PlaybackEngine {
    pub fn new(transport: Arc<dyn VoiceTransport>) -> Self {
        let (state_tx, _) = watch::channel(PlaybackState::Idle);
        Self {
            transport,
            current: None,
            state_tx,
        }
    }

    /// Turn a stored sample into a playable resource. Runs in the caller's
    /// context so an unreadable file fails the `play` call itself.
    pub async fn create_resource(sample: &dyn Sample) -> Result<AudioResource, Error> {
        let path = sample.open().await?;
        // Probe readability now rather than letting the transport discover it mid-stream.
        tokio::fs::File::open(&path).await?;

        Ok(AudioResource {
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
            sample_id: sample.id().to_string(),
            path,
        })
    }

    pub fn state(&self) -> PlaybackState {
        *self.state_tx.borrow()
    }

    pub fn current(&self) -> Option<&AudioResource> {
        self.current.as_ref()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    pub async fn play(&mut self, resource: AudioResource) -> Result<(), Error> {
        if let Some(previous) = self.current.take() {
            debug!(
                "(PlaybackEngine) '{}' supersedes '{}'",
                resource.sample_id, previous.sample_id
            );
            if let Err(e) = self.transport.stop_audio().await {
                warn!("(PlaybackEngine) failed to stop '{}': {e}", previous.sample_id);
            }
        }

        if let Err(e) = self.transport.play(&resource).await {
            self.state_tx.send_replace(PlaybackState::Idle);
            return Err(e);
        }

        trace!("(PlaybackEngine) playing '{}' (resource {})", resource.sample_id, resource.id);
        self.current = Some(resource);
        self.state_tx.send_replace(PlaybackState::Playing);
        Ok(())
    }

    /// Halt playback. A non-forced stop does nothing while idle; a forced one
    /// always tells the transport to go quiet. Returns whether a resource was playing.
    pub async fn stop(&mut self, force: bool) -> bool {
        let was_playing = self.current.take().is_some();
        if !was_playing && !force {
            return false;
        }

        if let Err(e) = self.transport.stop_audio().await {
            debug!("(PlaybackEngine) stop_audio failed: {e}");
        }
        self.state_tx.send_replace(PlaybackState::Idle);
        was_playing
    }

    /// Feed a player event from the transport. Returns the new state when it changed.
    pub fn on_player_event(&mut self, event: PlayerEvent) -> Option<PlaybackState> {
        let resource_id = match &event {
            PlayerEvent::Finished { resource_id } => *resource_id,
            PlayerEvent::Errored { resource_id, .. } => *resource_id,
        };

        let is_current = self.current.as_ref().is_some_and(|r| r.id == resource_id);
        if !is_current {
            trace!("(PlaybackEngine) ignoring event for stale resource {resource_id}");
            return None;
        }

        if let PlayerEvent::Errored { reason, .. } = &event {
            warn!("(PlaybackEngine) playback of resource {resource_id} failed: {reason}");
        }
        self.current = None;
        self.state_tx.send_replace(PlaybackState::Idle);
        Some(PlaybackState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::sample::FileSample;
    use async_trait::async_trait;
    use mockall::{mock, Sequence};
    use soundbot_common::models::voice::ChannelId;
    use std::io::Write;
    use std::path::PathBuf;

    mock! {
        Transport {}
        #[async_trait]
        impl VoiceTransport for Transport {
            async fn rejoin(&self, channel_id: ChannelId) -> Result<(), Error>;
            async fn play(&self, resource: &AudioResource) -> Result<(), Error>;
            async fn stop_audio(&self) -> Result<(), Error>;
            async fn destroy(&self) -> Result<(), Error>;
        }
    }

    fn resource(id: u64, name: &str) -> AudioResource {
        AudioResource {
            id,
            sample_id: name.to_string(),
            path: PathBuf::from(format!("/sounds/{name}.ogg")),
        }
    }

    #[tokio::test]
    async fn test_play_supersedes_previous_resource() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_play()
            .withf(|r| r.sample_id == "a")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        transport
            .expect_stop_audio()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        transport
            .expect_play()
            .withf(|r| r.sample_id == "b")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut engine = PlaybackEngine::new(Arc::new(transport));
        engine.play(resource(1, "a")).await.unwrap();
        engine.play(resource(2, "b")).await.unwrap();

        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.current().map(|r| r.sample_id.as_str()), Some("b"));

        // The superseded track finishing must not flip us to idle.
        assert_eq!(engine.on_player_event(PlayerEvent::Finished { resource_id: 1 }), None);
        assert_eq!(engine.state(), PlaybackState::Playing);

        assert_eq!(
            engine.on_player_event(PlayerEvent::Finished { resource_id: 2 }),
            Some(PlaybackState::Idle)
        );
        assert!(engine.current().is_none());
    }

    #[tokio::test]
    async fn test_decode_error_leaves_engine_idle() {
        let mut transport = MockTransport::new();
        transport.expect_play().returning(|_| Ok(()));

        let mut engine = PlaybackEngine::new(Arc::new(transport));
        engine.play(resource(7, "broken")).await.unwrap();

        let change = engine.on_player_event(PlayerEvent::Errored {
            resource_id: 7,
            reason: "corrupt opus frame".into(),
        });
        assert_eq!(change, Some(PlaybackState::Idle));
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_transport_play_failure_propagates() {
        let mut transport = MockTransport::new();
        transport
            .expect_play()
            .returning(|_| Err(Error::Transport("no driver".into())));

        let mut engine = PlaybackEngine::new(Arc::new(transport));
        let result = engine.play(resource(3, "x")).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_unforced_stop_when_idle_is_noop() {
        let mut transport = MockTransport::new();
        transport.expect_stop_audio().times(1).returning(|| Ok(()));

        let mut engine = PlaybackEngine::new(Arc::new(transport));
        assert!(!engine.stop(false).await);
        // Forced stop still reaches the transport.
        assert!(!engine.stop(true).await);
    }

    #[tokio::test]
    async fn test_create_resource_from_file() {
        let mut file = tempfile::Builder::new().suffix(".ogg").tempfile().unwrap();
        file.write_all(b"OggS").unwrap();

        let sample = FileSample::new("honk", file.path());
        let res = PlaybackEngine::create_resource(&sample).await.unwrap();
        assert_eq!(res.sample_id, "honk");
        assert_eq!(res.path, file.path());

        let other = PlaybackEngine::create_resource(&sample).await.unwrap();
        assert_ne!(res.id, other.id);
    }

    #[tokio::test]
    async fn test_create_resource_unreadable_file() {
        let sample = FileSample::new("ghost", "/definitely/not/here.ogg");
        let err = PlaybackEngine::create_resource(&sample).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
