//! Integration test utilities for ccsync
//!
//! [`TestFixture`] runs a [`PlaybackCore`] over a synthetic clip with a
//! presenter thread that keeps pulling frames, the way a real renderer
//! would, and offers polling helpers for events and snapshots.

use anyhow::{anyhow, Result};
use ccsync::source::{MediaOpener, SyntheticOpener, SyntheticSpec};
use ccsync::utils::config::SinkKind;
use ccsync::{Config, CoreEvent, PlaybackCore, PlaybackSnapshot};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Presenter pull period
const PRESENT_INTERVAL: Duration = Duration::from_millis(10);

/// Default wait for anything asynchronous
pub const WAIT: Duration = Duration::from_secs(5);

/// Configuration that needs no audio device
pub fn headless_config() -> Config {
    let mut config = Config::default();
    config.audio.sink = SinkKind::Clocked;
    config
}

/// Running core plus a background presenter
pub struct TestFixture {
    pub core: Arc<PlaybackCore>,
    pub events: Receiver<CoreEvent>,
    presented: Arc<Mutex<Vec<f64>>>,
    running: Arc<AtomicBool>,
    presenter: Option<JoinHandle<()>>,
}

impl TestFixture {
    /// Core over a synthetic clip of `duration` seconds with audio
    pub fn synthetic(duration: f64) -> Result<Self> {
        Self::with_spec(SyntheticSpec::with_duration(duration))
    }

    pub fn with_spec(spec: SyntheticSpec) -> Result<Self> {
        Self::with_opener(headless_config(), Arc::new(SyntheticOpener::new(spec)))
    }

    pub fn with_opener(config: Config, opener: Arc<dyn MediaOpener>) -> Result<Self> {
        let core = Arc::new(PlaybackCore::new(config, opener)?);
        let events = core.events();
        let presented = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let presenter = {
            let core = Arc::clone(&core);
            let presented = Arc::clone(&presented);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("test-presenter".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        if let Some(frame) = core.get_frame_for_render() {
                            presented.lock().push(frame.pts());
                        }
                        std::thread::sleep(PRESENT_INTERVAL);
                    }
                })?
        };

        Ok(Self {
            core,
            events,
            presented,
            running,
            presenter: Some(presenter),
        })
    }

    /// Open the clip and wait until it is loaded
    pub fn open(&self) -> Result<()> {
        self.core.open("synthetic");
        self.expect_event(|e| matches!(e, CoreEvent::MediaOpened(_)))?;
        Ok(())
    }

    /// Wait for the first event matching `pred`, skipping others
    pub fn expect_event<F>(&self, mut pred: F) -> Result<CoreEvent>
    where
        F: FnMut(&CoreEvent) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self
                .events
                .recv_timeout(remaining)
                .map_err(|_| anyhow!("timed out waiting for event"))?;
            if pred(&event) {
                return Ok(event);
            }
        }
    }

    /// Poll snapshots until `pred` holds
    pub fn wait_for<F>(&self, mut pred: F) -> Result<PlaybackSnapshot>
    where
        F: FnMut(&PlaybackSnapshot) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        loop {
            let snapshot = self.core.snapshot();
            if pred(&snapshot) {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(anyhow!("timed out, last snapshot: {}", snapshot));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Timestamps of every frame the presenter received
    pub fn presented(&self) -> Vec<f64> {
        self.presented.lock().clone()
    }

    pub fn clear_presented(&self) {
        self.presented.lock().clear();
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.presenter.take() {
            let _ = handle.join();
        }
    }
}
