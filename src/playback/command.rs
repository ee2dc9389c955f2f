//! Transport commands and the bounded queue feeding the command thread

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One transport request
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Open(PathBuf),
    Play,
    Pause,
    Stop,
    TogglePlayPause,

    /// Absolute seek target in seconds
    SeekAbs(f64),

    SetVolume(f32),
    SetSpeed(f64),
    Shutdown,
}

impl PlaybackCommand {
    /// Commands whose latest value is all that matters
    fn is_coalescable(&self) -> bool {
        matches!(
            self,
            PlaybackCommand::SeekAbs(_) | PlaybackCommand::SetVolume(_) | PlaybackCommand::SetSpeed(_)
        )
    }

    /// Whether a newer command of the same kind makes this one redundant
    fn coalesces_with(&self, other: &PlaybackCommand) -> bool {
        matches!(
            (self, other),
            (PlaybackCommand::SeekAbs(_), PlaybackCommand::SeekAbs(_))
                | (PlaybackCommand::SetVolume(_), PlaybackCommand::SetVolume(_))
                | (PlaybackCommand::SetSpeed(_), PlaybackCommand::SetSpeed(_))
        )
    }
}

impl fmt::Display for PlaybackCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackCommand::Open(path) => write!(f, "open {}", path.display()),
            PlaybackCommand::Play => f.write_str("play"),
            PlaybackCommand::Pause => f.write_str("pause"),
            PlaybackCommand::Stop => f.write_str("stop"),
            PlaybackCommand::TogglePlayPause => f.write_str("toggle"),
            PlaybackCommand::SeekAbs(t) => write!(f, "seek {:.3}s", t),
            PlaybackCommand::SetVolume(v) => write!(f, "volume {:.2}", v),
            PlaybackCommand::SetSpeed(s) => write!(f, "speed {:.2}x", s),
            PlaybackCommand::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// What happened to a pushed command
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Queued,

    /// Replaced a queued command of the same kind
    Coalesced,

    /// Queued after evicting the oldest command, which is returned
    DroppedOldest(PlaybackCommand),

    /// The queue is closed; the command was not accepted
    Closed,
}

struct QueueState {
    commands: VecDeque<PlaybackCommand>,
    closed: bool,
}

/// Bounded FIFO that never blocks producers
pub struct CommandQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
    coalesce: bool,
}

impl CommandQueue {
    pub fn new(capacity: usize, coalesce: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                commands: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
            coalesce,
        }
    }

    /// Enqueue a command, evicting the oldest one when full
    pub fn push(&self, command: PlaybackCommand) -> PushOutcome {
        let mut state = self.state.lock();
        if state.closed {
            return PushOutcome::Closed;
        }

        // only the trailing run of coalescable commands may be rewritten;
        // anything behind a transport command must still run after it
        if self.coalesce && command.is_coalescable() {
            let queued = state.commands
                .iter_mut()
                .rev()
                .take_while(|c| c.is_coalescable())
                .find(|c| c.coalesces_with(&command));
            if let Some(queued) = queued {
                *queued = command;
                drop(state);
                self.ready.notify_one();
                return PushOutcome::Coalesced;
            }
        }

        let dropped = if state.commands.len() >= self.capacity {
            state.commands.pop_front()
        } else {
            None
        };
        state.commands.push_back(command);
        drop(state);

        self.ready.notify_one();
        match dropped {
            Some(old) => PushOutcome::DroppedOldest(old),
            None => PushOutcome::Queued,
        }
    }

    /// Take the oldest command, waiting up to `timeout` for one
    pub fn pop_timeout(&self, timeout: Duration) -> Option<PlaybackCommand> {
        let mut state = self.state.lock();
        if state.commands.is_empty() && !state.closed {
            self.ready.wait_for(&mut state, timeout);
        }
        state.commands.pop_front()
    }

    /// Refuse further commands; already queued ones can still be popped
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
