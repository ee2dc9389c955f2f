//! Player state machine
//!
//! The legal moves between playback states live in one table so every
//! caller (commands, toggle, teardown) goes through the same check.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
    Buffering,
}

impl Default for PlayerState {
    fn default() -> Self {
        PlayerState::Stopped
    }
}

impl PlayerState {
    pub const ALL: [PlayerState; 4] = [
        PlayerState::Stopped,
        PlayerState::Playing,
        PlayerState::Paused,
        PlayerState::Buffering,
    ];

    /// Whether the transition table allows moving to `to`
    pub fn can_transition_to(self, to: PlayerState) -> bool {
        use PlayerState::*;

        match self {
            Stopped => matches!(to, Stopped | Playing),
            Playing | Paused | Buffering => true,
        }
    }

    /// Decoding runs only in this state
    pub fn is_playing(self) -> bool {
        self == PlayerState::Playing
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Stopped => "stopped",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Buffering => "buffering",
        };
        f.write_str(name)
    }
}

/// Seek waiting to be applied by the command thread
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeekRequest {
    pub pending: bool,

    /// Target in seconds
    pub target: f64,
}

impl SeekRequest {
    pub fn set(&mut self, target: f64) {
        self.pending = true;
        self.target = target;
    }

    pub fn clear(&mut self) {
        self.pending = false;
    }

    /// Pending target, if any
    pub fn target(&self) -> Option<f64> {
        self.pending.then_some(self.target)
    }
}
