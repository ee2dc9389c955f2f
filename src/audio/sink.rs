//! Output sinks
//!
//! A sink is whatever drives [`DevicePull::pull`]: the sound card through
//! cpal, or a real-time ticker that discards the samples for headless runs.

use super::cpal_output::CpalSink;
use super::output::DevicePull;
use crate::utils::config::SinkKind;
use crate::utils::error::{PlaybackError, Result};
use crossbeam_channel::{bounded, select, tick, Sender};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Tick period of the clocked sink
pub const CLOCKED_PERIOD: Duration = Duration::from_millis(10);

/// Consumer side of the audio ring
pub trait AudioSink {
    /// Start or stop pulling
    fn set_paused(&mut self, paused: bool) -> Result<()>;

    /// Short name for logs and snapshots
    fn name(&self) -> &'static str;
}

/// Open the configured sink, falling back to the clocked sink when the device is unusable
pub fn open_sink(kind: SinkKind, pull: DevicePull) -> Box<dyn AudioSink> {
    if kind == SinkKind::Device {
        match CpalSink::open(pull.clone()) {
            Ok(sink) => return Box::new(sink),
            Err(e) => warn!("Audio device unavailable, using clocked output: {}", e),
        }
    }

    match ClockedSink::start(pull, CLOCKED_PERIOD) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("Clocked audio output failed to start: {}", e);
            Box::new(NullSink)
        }
    }
}

/// Pulls at real-time pace from its own thread
pub struct ClockedSink {
    paused: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ClockedSink {
    /// Start the ticker thread, initially paused
    pub fn start(pull: DevicePull, period: Duration) -> Result<Self> {
        let paused = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread_paused = Arc::clone(&paused);
        let thread = thread::Builder::new()
            .name("audio-clocked".to_string())
            .spawn(move || {
                let format = pull.format();
                let channels = format.channels.max(1) as usize;
                let ticker = tick(period);
                let mut last = Instant::now();
                let mut carry = 0.0f64;
                let mut buffer = Vec::new();

                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let now = Instant::now();
                            let elapsed = now.duration_since(last);
                            last = now;
                            if thread_paused.load(Ordering::Acquire) {
                                carry = 0.0;
                                continue;
                            }

                            carry += elapsed.as_secs_f64() * format.sample_rate as f64;
                            let frames = carry.floor() as usize;
                            carry -= frames as f64;
                            if frames == 0 {
                                continue;
                            }

                            buffer.resize(frames * channels, 0.0f32);
                            pull.pull(&mut buffer);
                        }
                    }
                }
                debug!("Clocked audio sink stopped");
            })
            .map_err(|e| PlaybackError::Allocation(format!("Failed to spawn clocked sink: {}", e)))?;

        Ok(Self {
            paused,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl AudioSink for ClockedSink {
    fn set_paused(&mut self, paused: bool) -> Result<()> {
        self.paused.store(paused, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "clocked"
    }
}

impl Drop for ClockedSink {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Clocked audio sink thread panicked");
            }
        }
    }
}

/// Sink that never pulls; the audio clock stays where decoding left it
struct NullSink;

impl AudioSink for NullSink {
    fn set_paused(&mut self, _paused: bool) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
