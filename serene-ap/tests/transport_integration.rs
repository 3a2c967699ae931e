//! Transport controller integration tests
//!
//! Run against the software output device under a paused Tokio clock, so
//! "wall time" below is virtual and exact.

mod helpers;

use helpers::{base64_payload, silent_payload, virtual_engine};
use serene_ap::audio::{EncodedPayload, HandlePhase, StopReason};
use serene_ap::playback::LoadOutcome;
use serene_ap::Error;
use serene_common::events::{PlaybackState, PlayerEvent};
use std::time::Duration;
use tokio::time::sleep;

fn assert_near(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} ± {}, got {}",
        expected,
        tolerance,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn test_two_second_buffer_scenario() {
    let (engine, _device) = virtual_engine();

    let outcome = engine.load(silent_payload(2.0)).await.unwrap();
    assert_eq!(outcome, LoadOutcome::Ready { duration_seconds: 2.0 });
    assert_eq!(engine.duration().await, 2.0);

    engine.play().await;
    sleep(Duration::from_secs(1)).await;
    assert_near(engine.current_time().await, 1.0, 0.05);
    assert_near(engine.status().current_time_seconds, 1.0, 0.05);

    engine.seek(5.0).await;
    assert_eq!(engine.pause_position().await, 2.0);

    engine.set_volume(-0.3).await;
    assert_eq!(engine.volume().await, 0.0);
    engine.set_volume(1.7).await;
    assert_eq!(engine.volume().await, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_play_pause_play_resumes_in_place() {
    let (engine, _device) = virtual_engine();
    engine.load(silent_payload(10.0)).await.unwrap();

    engine.play().await;
    sleep(Duration::from_millis(700)).await;
    engine.pause().await;
    let paused_at = engine.pause_position().await;
    assert_near(paused_at, 0.7, 1e-6);

    // Time passing while paused must not move the position
    sleep(Duration::from_secs(5)).await;
    assert_near(engine.current_time().await, paused_at, 1e-6);

    engine.play().await;
    assert_near(engine.current_time().await, paused_at, 0.016);

    sleep(Duration::from_millis(300)).await;
    assert_near(engine.current_time().await, 1.0, 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_natural_end_pins_position_and_stops_observer() {
    let (engine, device) = virtual_engine();
    let mut events = engine.subscribe_events();
    engine.load(silent_payload(2.0)).await.unwrap();

    engine.play().await;
    sleep(Duration::from_millis(2500)).await;

    assert_eq!(engine.state().await, PlaybackState::Paused);
    assert_eq!(engine.current_time().await, 2.0);
    assert_eq!(engine.pause_position().await, 2.0);
    let status = engine.status();
    assert!(!status.is_playing);
    assert_eq!(status.current_time_seconds, 2.0);
    assert!(!engine.is_observer_running());
    assert_eq!(device.last_handle().unwrap().phase, HandlePhase::Ended);

    let ticks = engine.observer_tick_count();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.observer_tick_count(), ticks);

    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::PlaybackCompleted { duration_seconds, .. } = event {
            assert_eq!(duration_seconds, 2.0);
            completed += 1;
        }
    }
    assert_eq!(completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_play_after_natural_end_restarts() {
    let (engine, _device) = virtual_engine();
    engine.load(silent_payload(1.0)).await.unwrap();
    engine.play().await;
    sleep(Duration::from_millis(1200)).await;
    assert_eq!(engine.state().await, PlaybackState::Paused);

    engine.play().await;
    assert_eq!(engine.state().await, PlaybackState::Playing);
    assert_near(engine.current_time().await, 0.0, 1e-6);
}

#[tokio::test]
async fn test_last_load_wins() {
    let (engine, _device) = virtual_engine();
    let mut events = engine.subscribe_events();

    // The first decode is much larger, so it is still running when the second load starts
    let (first, second) = tokio::join!(
        engine.load(silent_payload(120.0)),
        engine.load(silent_payload(3.0))
    );

    assert_eq!(first.unwrap(), LoadOutcome::Superseded);
    assert_eq!(second.unwrap(), LoadOutcome::Ready { duration_seconds: 3.0 });
    assert_eq!(engine.duration().await, 3.0);
    assert_eq!(engine.state().await, PlaybackState::Ready);

    let mut discarded = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::LoadDiscarded { sequence, .. } = event {
            discarded.push(sequence);
        }
    }
    assert_eq!(discarded, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_load_while_playing_supersedes_output() {
    let (engine, device) = virtual_engine();
    engine.load(silent_payload(5.0)).await.unwrap();
    engine.play().await;
    sleep(Duration::from_secs(1)).await;

    engine.load(silent_payload(2.0)).await.unwrap();

    let record = device.last_handle().unwrap();
    assert_eq!(record.stop_reason, Some(StopReason::Superseded));
    assert_eq!(device.running_handle_count(), 0);
    assert_eq!(engine.state().await, PlaybackState::Ready);
    assert_eq!(engine.pause_position().await, 0.0);
    assert_eq!(engine.duration().await, 2.0);
    assert!(!engine.is_observer_running());
}

#[tokio::test]
async fn test_unavailable_output_fails_load() {
    let (engine, device) = virtual_engine();
    device.set_available(false);

    let result = engine.load(silent_payload(1.0)).await;

    assert!(matches!(result, Err(Error::OutputUnavailable(_))));
    assert_eq!(engine.state().await, PlaybackState::Idle);
    assert_eq!(engine.duration().await, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_seek_while_playing_restarts_output() {
    let (engine, device) = virtual_engine();
    engine.load(silent_payload(4.0)).await.unwrap();
    engine.play().await;
    sleep(Duration::from_millis(500)).await;

    engine.seek(1.5).await;

    let handles = device.handles();
    assert_eq!(handles.len(), 2);
    assert_eq!(handles[0].stop_reason, Some(StopReason::Seek));
    assert_eq!(handles[1].start_offset, Some(1.5));
    assert_eq!(handles[1].phase, HandlePhase::Running);
    assert_eq!(device.running_handle_count(), 1);
    assert_eq!(engine.state().await, PlaybackState::Playing);

    sleep(Duration::from_millis(200)).await;
    assert_near(engine.current_time().await, 1.7, 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_never_more_than_one_running_handle() {
    let (engine, device) = virtual_engine();
    engine.load(silent_payload(30.0)).await.unwrap();

    engine.play().await;
    assert!(device.running_handle_count() <= 1);
    for target in [3.0, 10.0, 0.0, 25.0] {
        engine.seek(target).await;
        assert_eq!(device.running_handle_count(), 1);
        engine.toggle_play_pause().await;
        assert_eq!(device.running_handle_count(), 0);
        engine.toggle_play_pause().await;
        assert_eq!(device.running_handle_count(), 1);
    }

    engine.load(silent_payload(1.0)).await.unwrap();
    assert_eq!(device.running_handle_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reloading_releases_previous_buffers() {
    let (engine, device) = virtual_engine();

    for _ in 0..5 {
        engine.load(silent_payload(60.0)).await.unwrap();
        engine.play().await;
        sleep(Duration::from_millis(250)).await;
        engine.seek(30.0).await;
        // Only the handle now playing still holds audio
        assert_eq!(device.retained_buffer_count(), 1);
    }

    engine.pause().await;
    assert_eq!(device.retained_buffer_count(), 0);
    assert_eq!(device.handles().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_seek_clamps_in_every_state() {
    let (engine, _device) = virtual_engine();
    engine.load(silent_payload(2.0)).await.unwrap();

    for target in [-1.0, 0.5, 2.0, 9.0] {
        engine.seek(target).await;
        assert_eq!(engine.pause_position().await, target.clamp(0.0, 2.0));
    }

    engine.play().await;
    engine.seek(-4.0).await;
    assert_eq!(engine.pause_position().await, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_skip_moves_relative_and_clamps() {
    let (engine, _device) = virtual_engine();
    engine.load(silent_payload(40.0)).await.unwrap();
    engine.play().await;
    sleep(Duration::from_secs(2)).await;

    engine.skip_forward().await;
    assert_near(engine.current_time().await, 17.0, 1e-6);

    engine.skip(-30.0).await;
    assert_near(engine.current_time().await, 0.0, 1e-6);

    engine.pause().await;
    engine.skip(100.0).await;
    assert_eq!(engine.pause_position().await, 40.0);
}

#[tokio::test]
async fn test_toggle_mute() {
    let (engine, _device) = virtual_engine();
    engine.set_volume(0.4).await;

    assert_eq!(engine.toggle_mute().await, 0.0);
    assert_eq!(engine.toggle_mute().await, 1.0);
    assert_eq!(engine.volume().await, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_volume_is_kept_for_next_play() {
    let (engine, device) = virtual_engine();
    engine.set_volume(0.25).await;
    engine.load(silent_payload(1.0)).await.unwrap();
    engine.play().await;

    assert_eq!(device.last_handle().unwrap().gain, 0.25);
}

#[tokio::test(start_paused = true)]
async fn test_status_channel_follows_transport() {
    let (engine, _device) = virtual_engine();
    let mut status = engine.subscribe_status();
    engine.load(silent_payload(2.0)).await.unwrap();

    engine.play().await;
    status.changed().await.unwrap();
    assert!(status.borrow_and_update().is_playing);

    sleep(Duration::from_millis(500)).await;
    let snapshot = status.borrow_and_update().clone();
    assert_eq!(snapshot.state, PlaybackState::Playing);
    assert_near(snapshot.current_time_seconds, 0.5, 0.02);

    engine.pause().await;
    let snapshot = engine.status();
    assert_eq!(snapshot.state, PlaybackState::Paused);
    assert_near(snapshot.current_time_seconds, 0.5, 1e-6);
}

#[tokio::test]
async fn test_base64_file_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.b64");
    std::fs::write(&path, base64_payload(1.5)).unwrap();

    let payload = EncodedPayload::from_file(&path, true).await.unwrap();
    let (engine, _device) = virtual_engine();
    let outcome = engine.load(payload).await.unwrap();

    assert_eq!(outcome, LoadOutcome::Ready { duration_seconds: 1.5 });
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_inflight_state() {
    let (engine, device) = virtual_engine();
    engine.load(silent_payload(3.0)).await.unwrap();
    engine.play().await;

    engine.shutdown().await;

    assert_eq!(engine.state().await, PlaybackState::Idle);
    assert_eq!(device.running_handle_count(), 0);
    assert_eq!(
        device.last_handle().unwrap().stop_reason,
        Some(StopReason::Teardown)
    );

    // Engine stays usable after teardown
    engine.load(silent_payload(1.0)).await.unwrap();
    assert_eq!(engine.state().await, PlaybackState::Ready);
}
