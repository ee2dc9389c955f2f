//! Volume ramping
//!
//! Volume changes are spread over a short ramp so a jump from the control
//! surface never produces a click. Gain is advanced once per sample frame
//! and applied to every channel of that frame.

use crate::player::{MAX_VOLUME, MIN_VOLUME};
use crate::utils::clamp;
use serde::{Deserialize, Serialize};

/// Default ramp length in sample frames (about 10 ms at 48 kHz)
pub const DEFAULT_RAMP_FRAMES: usize = 512;

/// Shape of the gain curve between start and target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampType {
    /// Straight line
    #[default]
    Linear,

    /// Fast start when rising, slow start when falling
    Exponential,

    /// Smoothstep
    SCurve,
}

/// Per-frame gain interpolator
#[derive(Debug, Clone)]
pub struct VolumeRamp {
    start: f32,
    current: f32,
    target: f32,
    duration_frames: usize,
    frames_processed: usize,
    ramp_type: RampType,
}

impl VolumeRamp {
    pub fn new(volume: f32, duration_frames: usize, ramp_type: RampType) -> Self {
        let volume = clamp(volume, MIN_VOLUME, MAX_VOLUME);
        Self {
            start: volume,
            current: volume,
            target: volume,
            duration_frames: duration_frames.max(1),
            frames_processed: duration_frames.max(1),
            ramp_type,
        }
    }

    /// Start ramping from the current gain towards `target`
    pub fn set_target(&mut self, target: f32) {
        let target = clamp(target, MIN_VOLUME, MAX_VOLUME);
        if (target - self.current).abs() > 0.001 {
            self.start = self.current;
            self.target = target;
            self.frames_processed = 0;
        } else {
            self.start = target;
            self.current = target;
            self.target = target;
            self.frames_processed = self.duration_frames;
        }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn ramp_type(&self) -> RampType {
        self.ramp_type
    }

    pub fn is_ramping(&self) -> bool {
        self.frames_processed < self.duration_frames
    }

    /// Gain for the next frame
    pub fn next_gain(&mut self) -> f32 {
        if !self.is_ramping() {
            self.current = self.target;
            return self.current;
        }

        self.frames_processed += 1;
        let progress = self.frames_processed as f32 / self.duration_frames as f32;
        let factor = match self.ramp_type {
            RampType::Linear => progress,
            RampType::Exponential => {
                if self.target > self.start {
                    1.0 - (1.0 - progress).powi(2)
                } else {
                    progress.powi(2)
                }
            }
            RampType::SCurve => progress * progress * (3.0 - 2.0 * progress),
        };

        self.current = self.start + (self.target - self.start) * factor;
        self.current
    }

    /// Scale interleaved samples in place
    pub fn apply(&mut self, samples: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        if !self.is_ramping() {
            let gain = self.target;
            self.current = gain;
            if gain < 1.0 {
                samples.iter_mut().for_each(|s| *s *= gain);
            }
            return;
        }

        for frame in samples.chunks_mut(channels) {
            let gain = self.next_gain();
            frame.iter_mut().for_each(|s| *s *= gain);
        }
    }
}
