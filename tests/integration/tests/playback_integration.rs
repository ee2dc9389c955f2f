//! End-to-end tests for the playback core
//!
//! Every test drives a real [`PlaybackCore`] over a synthetic clip, with
//! audio paced by the clocked sink so no output device is needed.

use anyhow::Result;
use ccsync::source::{DecodeOptions, MediaOpener, OpenedMedia, SyntheticSpec};
use ccsync::{CoreEvent, PlaybackError, PlayerState};
use ccsync_integration_tests::{headless_config, TestFixture};
use mockall::mock;
use serial_test::serial;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub Opener {}

    impl MediaOpener for Opener {
        fn open(&self, path: &Path, options: &DecodeOptions) -> ccsync::Result<OpenedMedia>;
    }
}

#[test]
#[serial]
fn test_open_publishes_media() -> Result<()> {
    let fixture = TestFixture::synthetic(120.0)?;
    fixture.open()?;

    let snapshot = fixture.wait_for(|s| s.has_media)?;
    assert_eq!(snapshot.state, PlayerState::Stopped);
    assert!((snapshot.duration - 120.0).abs() < 0.1);
    assert!(snapshot.has_audio);
    assert_eq!(snapshot.audio_sink, Some("clocked"));
    assert_eq!(snapshot.current_time, 0.0);
    Ok(())
}

#[test]
#[serial]
fn test_play_advances_clock() -> Result<()> {
    let fixture = TestFixture::synthetic(120.0)?;
    fixture.open()?;
    fixture.core.play();

    fixture.expect_event(|e| matches!(e, CoreEvent::StateChanged { to: PlayerState::Playing, .. }))?;
    let snapshot = fixture.wait_for(|s| s.current_time > 0.3)?;
    assert!(snapshot.current_time < 3.0, "clock ran ahead: {}", snapshot);
    assert!(!fixture.presented().is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_presented_frames_are_in_order() -> Result<()> {
    let fixture = TestFixture::synthetic(120.0)?;
    fixture.open()?;
    fixture.core.play();
    fixture.wait_for(|s| s.current_time > 1.0)?;

    let presented = fixture.presented();
    assert!(presented.len() > 5);
    assert!(presented.windows(2).all(|pair| pair[1] > pair[0]), "{:?}", presented);
    Ok(())
}

#[test]
#[serial]
fn test_seek_repositions_both_streams() -> Result<()> {
    let fixture = TestFixture::synthetic(120.0)?;
    fixture.open()?;
    fixture.core.play();
    fixture.wait_for(|s| s.current_time > 0.2)?;

    fixture.core.seek(50.0);
    let event = fixture.expect_event(|e| matches!(e, CoreEvent::SeekCompleted { .. }))?;
    assert!(matches!(event, CoreEvent::SeekCompleted { target } if (target - 50.0).abs() < 1e-9));
    fixture.clear_presented();

    let snapshot = fixture.wait_for(|s| s.current_time > 50.3)?;
    assert!(snapshot.current_time < 53.0, "clock ran ahead: {}", snapshot);
    assert_eq!(snapshot.stats.seeks, 1);

    fixture.wait_for(|_| fixture.presented().len() > 3)?;
    let presented = fixture.presented();
    assert!(presented.iter().all(|&pts| pts >= 49.9), "stale frames after seek: {:?}", presented);
    Ok(())
}

#[test]
#[serial]
fn test_pause_holds_clock() -> Result<()> {
    let fixture = TestFixture::synthetic(120.0)?;
    fixture.open()?;
    fixture.core.play();
    fixture.wait_for(|s| s.current_time > 0.3)?;

    fixture.core.pause();
    fixture.expect_event(|e| matches!(e, CoreEvent::StateChanged { to: PlayerState::Paused, .. }))?;
    let held = fixture.wait_for(|s| s.state == PlayerState::Paused)?.current_time;

    std::thread::sleep(Duration::from_millis(400));
    let later = fixture.core.snapshot().current_time;
    assert!((later - held).abs() < 0.05, "clock moved while paused: {} -> {}", held, later);

    fixture.core.play();
    fixture.wait_for(|s| s.current_time > held + 0.2)?;
    Ok(())
}

#[test]
#[serial]
fn test_stop_rewinds() -> Result<()> {
    let fixture = TestFixture::synthetic(120.0)?;
    fixture.open()?;
    fixture.core.play();
    fixture.wait_for(|s| s.current_time > 0.3)?;

    fixture.core.stop();
    let snapshot = fixture.wait_for(|s| s.state == PlayerState::Stopped)?;
    assert_eq!(snapshot.current_time, 0.0);
    assert!(snapshot.has_media);
    Ok(())
}

#[test]
#[serial]
fn test_volume_speed_and_seek_are_clamped() -> Result<()> {
    let fixture = TestFixture::synthetic(120.0)?;
    fixture.open()?;

    fixture.core.set_volume(3.0);
    fixture.core.set_speed(10.0);
    let snapshot = fixture.wait_for(|s| s.volume == 1.0 && s.speed == 2.0)?;
    assert!(snapshot.has_media);

    fixture.core.set_volume(-1.0);
    fixture.core.set_speed(0.0);
    fixture.wait_for(|s| s.volume == 0.0 && s.speed == 0.25)?;

    fixture.core.seek(-5.0);
    let event = fixture.expect_event(|e| matches!(e, CoreEvent::SeekCompleted { .. }))?;
    assert!(matches!(event, CoreEvent::SeekCompleted { target } if target == 0.0));
    Ok(())
}

#[test]
#[serial]
fn test_end_of_media_and_replay() -> Result<()> {
    let fixture = TestFixture::synthetic(1.0)?;
    fixture.open()?;
    fixture.core.play();

    fixture.expect_event(|e| matches!(e, CoreEvent::EndOfMedia))?;
    let snapshot = fixture.wait_for(|s| s.eof)?;
    assert_eq!(snapshot.state, PlayerState::Playing);
    assert!(snapshot.current_time > 0.5);

    // playing again after the end starts over
    fixture.core.play();
    let event = fixture.expect_event(|e| matches!(e, CoreEvent::SeekCompleted { .. }))?;
    assert!(matches!(event, CoreEvent::SeekCompleted { target } if target == 0.0));
    fixture.wait_for(|s| !s.eof)?;
    Ok(())
}

#[test]
#[serial]
fn test_video_only_uses_fallback_clock() -> Result<()> {
    let spec = SyntheticSpec {
        audio: None,
        ..SyntheticSpec::with_duration(30.0)
    };
    let fixture = TestFixture::with_spec(spec)?;
    fixture.open()?;

    let snapshot = fixture.wait_for(|s| s.has_media)?;
    assert!(!snapshot.has_audio);
    assert_eq!(snapshot.audio_sink, None);

    fixture.core.play();
    let snapshot = fixture.wait_for(|s| s.current_time > 0.3)?;
    assert!(snapshot.current_time < 3.0);
    Ok(())
}

#[test]
#[serial]
fn test_failed_seek_keeps_playing() -> Result<()> {
    let spec = SyntheticSpec {
        fail_seek: true,
        ..SyntheticSpec::with_duration(120.0)
    };
    let fixture = TestFixture::with_spec(spec)?;
    fixture.open()?;
    fixture.core.play();
    fixture.wait_for(|s| s.current_time > 0.2)?;

    fixture.core.seek(60.0);
    fixture.expect_event(|e| matches!(e, CoreEvent::SeekFailed { .. }))?;

    let snapshot = fixture.core.snapshot();
    assert_eq!(snapshot.state, PlayerState::Playing);
    assert!(snapshot.current_time < 10.0);
    Ok(())
}

#[test]
#[serial]
fn test_open_failure_reports_and_stays_idle() -> Result<()> {
    let mut opener = MockOpener::new();
    opener
        .expect_open()
        .withf(|path, _| path == Path::new("broken.mkv"))
        .times(1)
        .returning(|_, _| Err(PlaybackError::Open("unsupported codec".into())));

    let fixture = TestFixture::with_opener(headless_config(), Arc::new(opener))?;
    fixture.core.open("broken.mkv");

    let event = fixture.expect_event(|e| matches!(e, CoreEvent::OpenFailed { .. }))?;
    match event {
        CoreEvent::OpenFailed { path, message } => {
            assert_eq!(path, Path::new("broken.mkv"));
            assert!(message.contains("unsupported codec"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // transport commands without media are refused
    fixture.core.play();
    std::thread::sleep(Duration::from_millis(100));
    let snapshot = fixture.core.snapshot();
    assert!(!snapshot.has_media);
    assert_eq!(snapshot.state, PlayerState::Stopped);
    Ok(())
}

#[test]
#[serial]
fn test_reopen_replaces_media() -> Result<()> {
    let fixture = TestFixture::synthetic(120.0)?;
    fixture.open()?;
    fixture.core.play();
    fixture.wait_for(|s| s.current_time > 0.3)?;

    fixture.open()?;
    let snapshot = fixture.wait_for(|s| s.has_media && s.state == PlayerState::Stopped)?;
    assert_eq!(snapshot.current_time, 0.0);
    Ok(())
}
