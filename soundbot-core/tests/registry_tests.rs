// File: soundbot-core/tests/registry_tests.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use twilight_model::id::Id;

use soundbot_common::models::voice::{
    ConnectionStatus, DisconnectCause, PlaybackState, PlayerEvent, TransportEvent, VoiceMember,
};
use soundbot_core::eventbus::{BotEvent, EventBus};
use soundbot_core::test_utils::{ConnectBehavior, FakeConnector, RejoinBehavior};
use soundbot_core::voice::{FileSample, SessionRegistry, VoiceConfig};
use soundbot_core::Error;

fn member(guild: u64, channel: Option<u64>) -> VoiceMember {
    VoiceMember {
        guild_id: Id::new(guild),
        user_id: Id::new(500),
        channel_id: channel.map(Id::new),
    }
}

fn registry(connector: &Arc<FakeConnector>) -> SessionRegistry {
    SessionRegistry::new(connector.clone(), VoiceConfig::default())
}

#[tokio::test]
async fn test_join_returns_ready_session() -> Result<(), Error> {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let reg = registry(&connector);

    let sub = reg.join(&member(1, Some(10))).await?;
    assert_eq!(sub.status(), ConnectionStatus::Ready);
    assert_eq!(sub.channel_id(), Id::new(10));
    assert!(reg.has(Id::new(1)));
    assert_eq!(reg.guilds(), vec![Id::new(1)]);
    assert_eq!(connector.connect_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_joins_share_one_session() -> Result<(), Error> {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let reg = registry(&connector);
    let m = member(1, Some(10));

    let (a, b) = tokio::join!(reg.join(&m), reg.join(&m));
    let (a, b) = (a?, b?);

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(reg.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_join_before_ready_shares_the_outcome() {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Stall));
    let reg = registry(&connector);

    let first = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.join(&member(1, Some(10))).await })
    };
    tokio::task::yield_now().await;
    assert!(reg.has(Id::new(1)), "first join should have registered a session");

    // The second caller waits on the pending connection instead of getting it back early.
    let second = reg.join(&member(1, Some(10))).await;
    assert!(matches!(second, Err(Error::TryAgain)));
    assert!(matches!(first.await.unwrap(), Err(Error::TryAgain)));
    assert_eq!(connector.connect_count(), 1);
    assert!(!reg.has(Id::new(1)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_joins_on_stalled_connection_both_fail() {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Stall));
    let reg = registry(&connector);
    let m = member(1, Some(10));

    let started = Instant::now();
    let (a, b) = tokio::join!(reg.join(&m), reg.join(&m));

    assert!(matches!(a, Err(Error::TryAgain)));
    assert!(matches!(b, Err(Error::TryAgain)));
    assert!(started.elapsed() < Duration::from_secs(21));
    assert_eq!(connector.connect_count(), 1);
    assert!(reg.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_join_waits_for_ready() -> Result<(), Error> {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Stall));
    let reg = registry(&connector);

    let first = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.join(&member(1, Some(10))).await })
    };
    tokio::task::yield_now().await;
    let second = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.join(&member(1, Some(10))).await })
    };

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!second.is_finished());
    connector.transport(Id::new(1)).unwrap().emit(TransportEvent::Ready);

    let a = first.await.unwrap()?;
    let b = second.await.unwrap()?;
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(b.status(), ConnectionStatus::Ready);
    Ok(())
}

#[tokio::test]
async fn test_join_without_voice_channel() {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let reg = registry(&connector);

    let res = reg.join(&member(1, None)).await;
    assert!(matches!(res, Err(Error::NotInVoiceChannel)));
    assert_eq!(connector.connect_count(), 0);
    assert!(reg.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_join_times_out_with_try_again() {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Stall));
    let reg = registry(&connector);

    let started = Instant::now();
    let res = reg.join(&member(1, Some(10))).await;
    let elapsed = started.elapsed();

    assert!(matches!(res, Err(Error::TryAgain)));
    assert!(elapsed >= Duration::from_secs(20), "gave up too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(21), "gave up too late: {elapsed:?}");
    assert!(!reg.has(Id::new(1)));

    let transport = connector.transport(Id::new(1)).unwrap();
    assert_eq!(transport.destroy_count(), 1);

    // A retry is a fresh attempt.
    let _ = reg.join(&member(1, Some(10))).await;
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test]
async fn test_connect_failure_maps_to_try_again() {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Fail));
    let reg = registry(&connector);

    let res = reg.join(&member(1, Some(10))).await;
    assert!(matches!(res, Err(Error::TryAgain)));
    assert!(reg.is_empty());
}

#[tokio::test]
async fn test_destroy_twice_removes_once() -> Result<(), Error> {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let bus = EventBus::new();
    let mut events = bus.subscribe(Some(64)).await;
    let reg = SessionRegistry::with_event_bus(connector.clone(), VoiceConfig::default(), bus.clone());

    let sub = reg.join(&member(1, Some(10))).await?;
    let first_id = sub.session_id();
    tokio::join!(sub.destroy(), sub.destroy());
    sub.destroy().await;
    assert!(!reg.has(Id::new(1)));
    assert_eq!(connector.transport(Id::new(1)).unwrap().destroy_count(), 1);

    // A new session for the same guild is not touched by the old one.
    let again = reg.join(&member(1, Some(10))).await?;
    assert_ne!(again.session_id(), first_id);
    sub.destroy().await;
    assert!(reg.has(Id::new(1)));

    again.destroy().await;
    reg.await_all_destroyed().await;
    bus.shutdown();

    let mut removed = Vec::new();
    let mut all_gone = 0;
    while let Ok(Some(evt)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
        match evt {
            BotEvent::SessionRemoved { session_id, .. } => removed.push(session_id),
            BotEvent::AllSessionsDestroyed => all_gone += 1,
            _ => {}
        }
    }
    assert_eq!(removed, vec![first_id, again.session_id()]);
    assert_eq!(all_gone, 2);
    Ok(())
}

#[tokio::test]
async fn test_await_all_destroyed_drains_registry() -> Result<(), Error> {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let reg = registry(&connector);

    // Empty registry resolves immediately.
    tokio::time::timeout(Duration::from_millis(100), reg.await_all_destroyed())
        .await
        .expect("empty registry should already be drained");

    reg.join(&member(1, Some(10))).await?;
    reg.join(&member(2, Some(20))).await?;

    let waiter = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.await_all_destroyed().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    reg.destroy_all().await;
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should finish once the registry is empty")
        .unwrap();
    assert!(reg.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_count_settles_at_zero_after_racing_teardowns() -> Result<(), Error> {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let reg = registry(&connector);

    for round in 0..200u64 {
        let guild = round % 3 + 1;
        let sub = reg.join(&member(guild, Some(10))).await?;
        let (a, b) = (reg.clone(), sub.clone());
        let destroyer = tokio::spawn(async move { b.destroy().await });
        let joiner = tokio::spawn(async move {
            let _ = a.join(&member(guild + 10, Some(20))).await;
        });
        let _ = tokio::join!(destroyer, joiner);
        reg.destroy_all().await;

        tokio::time::timeout(Duration::from_secs(2), reg.await_all_destroyed())
            .await
            .unwrap_or_else(|_| panic!("live count stuck above zero in round {round}"));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_backoff_is_capped_at_five_attempts() -> Result<(), Error> {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready).with_rejoin(RejoinBehavior::Fail));
    let reg = registry(&connector);
    let sub = reg.join(&member(1, Some(10))).await?;
    let transport = connector.transport(Id::new(1)).unwrap();

    let t0 = Instant::now();
    transport.emit(TransportEvent::Disconnected(DisconnectCause::Other("udp timeout".into())));
    sub.destroyed().await;

    let rejoins = transport.rejoins();
    assert_eq!(rejoins.len(), 5);
    let mut previous = t0;
    let mut gaps = Vec::new();
    for (channel, at) in &rejoins {
        assert_eq!(*channel, Id::new(10));
        gaps.push((*at - previous).as_secs());
        previous = *at;
    }
    assert_eq!(gaps, vec![5, 10, 15, 20, 25]);
    assert!(!reg.has(Id::new(1)));
    assert_eq!(transport.destroy_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_recovers_session() -> Result<(), Error> {
    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let reg = registry(&connector);
    let sub = reg.join(&member(1, Some(10))).await?;
    let transport = connector.transport(Id::new(1)).unwrap();

    transport.emit(TransportEvent::Disconnected(DisconnectCause::Other("network".into())));
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(transport.rejoins().len(), 1);
    assert_eq!(sub.status(), ConnectionStatus::Ready);
    assert!(reg.has(Id::new(1)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_play_supersedes_and_tracks_state() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("a.ogg"), b"OggS")?;
    std::fs::write(dir.path().join("b.ogg"), b"OggS")?;
    let a = FileSample::new("a", dir.path().join("a.ogg"));
    let b = FileSample::new("b", dir.path().join("b.ogg"));

    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let reg = registry(&connector);
    let sub = reg.join(&member(1, Some(10))).await?;
    let transport = connector.transport(Id::new(1)).unwrap();

    let res_a = sub.play(&a).await?;
    let res_b = sub.play(&b).await?;
    assert_eq!(transport.played(), vec!["a", "b"]);
    assert_eq!(transport.stop_count(), 1);
    assert_eq!(sub.playback_state(), PlaybackState::Playing);

    transport.emit(TransportEvent::Player(PlayerEvent::Finished { resource_id: res_a.id }));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sub.playback_state(), PlaybackState::Playing);

    transport.emit(TransportEvent::Player(PlayerEvent::Finished { resource_id: res_b.id }));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sub.playback_state(), PlaybackState::Idle);

    // Unreadable sample fails the call without touching the transport.
    let missing = FileSample::new("missing", dir.path().join("missing.ogg"));
    assert!(matches!(sub.play(&missing).await, Err(Error::Io(_))));
    assert_eq!(transport.played().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_stop_keeps_connection_and_destroy_stops_audio() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("a.ogg"), b"OggS")?;
    let a = FileSample::new("a", dir.path().join("a.ogg"));

    let connector = Arc::new(FakeConnector::new(ConnectBehavior::Ready));
    let reg = registry(&connector);
    let sub = reg.join(&member(1, Some(10))).await?;
    let transport = connector.transport(Id::new(1)).unwrap();

    sub.play(&a).await?;
    assert!(sub.stop().await);
    assert_eq!(sub.playback_state(), PlaybackState::Idle);
    assert_eq!(sub.status(), ConnectionStatus::Ready);
    assert!(reg.has(Id::new(1)));

    sub.play(&a).await?;
    let stops_before = transport.stop_count();
    sub.destroy().await;
    assert_eq!(transport.stop_count(), stops_before + 1);
    assert_eq!(sub.playback_state(), PlaybackState::Idle);
    Ok(())
}
