mod common;

use std::sync::Arc;

use common::{record, tick_until, wav_bytes, write_source};
use waveplay_core::{
    BackendKind, ClockedElement, EventKind, FileLoader, ManualDevice, MarkOptions, MediaElement,
    PlayerConfig, PlayerController, PlayerEvent, PlayerState, RecordingRenderer, RenderCommand,
    WaveplayError,
};

/// 1000 bytes of stream per second, playable after half a second.
fn stream_config() -> PlayerConfig {
    PlayerConfig {
        stream_bitrate_kbps: 8,
        can_play_seconds: 0.5,
        ..Default::default()
    }
}

fn streaming_player(
    config: PlayerConfig,
) -> (PlayerController, ManualDevice, RecordingRenderer) {
    let clock = ManualDevice::new();
    let renderer = RecordingRenderer::new(100);
    let element_clock = clock.clone();
    let element_config = config.clone();
    let player = PlayerController::builder(config, Box::new(renderer.clone()))
        .device(Box::new(clock.clone()))
        .loader(Arc::new(FileLoader))
        .media_factory(Box::new(move || -> Box<dyn MediaElement> {
            Box::new(ClockedElement::new(
                Box::new(element_clock.clone()),
                Arc::new(FileLoader),
                &element_config,
            ))
        }))
        .build()
        .unwrap();
    (player, clock, renderer)
}

#[test]
fn undecodable_sources_fall_back_to_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "broadcast.bin", &[0x5a; 2_000]);
    let (mut player, clock, renderer) = streaming_player(stream_config());
    let events = record(&player, &[EventKind::Ready, EventKind::Error, EventKind::Progress]);
    assert_eq!(player.backend_kind(), BackendKind::Decoded);

    player.load(&source).unwrap();
    assert!(tick_until(&mut player, |p| p.state() == PlayerState::Playing));

    assert_eq!(player.backend_kind(), BackendKind::Streaming);
    assert!(!player.is_ready());
    assert!(player.last_error().is_none());
    assert!(renderer.commands().contains(&RenderCommand::SetMinWidth(2)));
    assert!(events.lock().unwrap().is_empty());

    clock.advance(0.5);
    player.tick().unwrap();
    assert!((player.played_percents() - 0.25).abs() < 1e-9);
    assert!(renderer.commands().iter().any(|command| matches!(
        command,
        RenderCommand::DrawStreamFrame { percentage, .. } if (*percentage - 0.25).abs() < 1e-9
    )));
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|event| matches!(event, PlayerEvent::Progress(p) if (*p - 0.25).abs() < 1e-9)));
}

#[test]
fn streaming_configuration_skips_decoding() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "live.bin", &[0x10; 1_500]);
    let config = PlayerConfig {
        backend: BackendKind::Streaming,
        ..stream_config()
    };
    let (mut player, _clock, renderer) = streaming_player(config);
    assert_eq!(player.backend_kind(), BackendKind::Streaming);

    player.load(&source).unwrap();
    assert!(tick_until(&mut player, |p| p.state() == PlayerState::Playing));

    assert!(!renderer.commands().contains(&RenderCommand::DrawLoading(1.0)));
    assert!((player.duration() - 1.5).abs() < 1e-9);
}

#[test]
fn streams_end_paused_and_can_be_marked() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "short.bin", &[0x33; 1_000]);
    let (mut player, clock, _renderer) = streaming_player(stream_config());
    let events = record(&player, &[EventKind::Mark]);

    player.load(&source).unwrap();
    assert!(tick_until(&mut player, |p| p.state() == PlayerState::Playing
        && p.duration() == 1.0));
    player.mark(MarkOptions::at(0.5).with_id("half")).unwrap();

    for _ in 0..30 {
        clock.advance(0.05);
        player.tick().unwrap();
    }

    assert!(player.is_paused());
    assert_eq!(player.current_time(), 1.0);
    let events = events.lock().unwrap();
    assert!(matches!(events.as_slice(), [PlayerEvent::Mark(marker)] if marker.id == "half"));
}

#[test]
fn unreachable_streams_report_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("gone.bin").to_str().unwrap().to_string();
    let config = PlayerConfig {
        backend: BackendKind::Streaming,
        ..stream_config()
    };
    let (mut player, _clock, _renderer) = streaming_player(config);
    let events = record(&player, &[EventKind::Error, EventKind::Ready]);

    player.load(&source).unwrap();
    assert!(tick_until(&mut player, |p| p.state() != PlayerState::Loading));

    assert_eq!(player.state(), PlayerState::Idle);
    assert!(matches!(player.last_error(), Some(WaveplayError::Load { .. })));
    let events = events.lock().unwrap();
    assert!(matches!(
        events.as_slice(),
        [PlayerEvent::Error { target, .. }] if *target == source
    ));
}

#[test]
fn decodable_sources_after_a_fallback_are_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let broadcast = write_source(dir.path(), "broadcast.bin", &[0x5a; 2_000]);
    let song = write_source(dir.path(), "song.wav", &wav_bytes(2.0, 4_000));
    let (mut player, _clock, _renderer) = streaming_player(stream_config());
    let events = record(&player, &[EventKind::Ready]);

    player.load(&broadcast).unwrap();
    assert!(tick_until(&mut player, |p| p.state() == PlayerState::Playing));
    assert_eq!(player.backend_kind(), BackendKind::Streaming);

    player.load(&song).unwrap();
    assert_eq!(player.backend_kind(), BackendKind::Decoded);
    assert!(tick_until(&mut player, |p| p.state() == PlayerState::Ready));

    assert!(player.is_ready());
    assert!((player.duration() - 2.0).abs() < 1e-9);
    assert_eq!(*events.lock().unwrap(), vec![PlayerEvent::Ready]);
}
