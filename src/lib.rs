//! ccsync - audio/video synchronization core
//!
//! Demuxes a container into elementary streams, decodes video and audio on
//! their own threads and re-times the decoded output against one shared
//! playback clock, so picture and sound stay aligned while transport
//! commands are applied.
//!
//! The entry point is [`PlaybackCore`]; [`source::FfmpegOpener`] reads real
//! media and [`source::SyntheticOpener`] generates a test pattern.

pub mod audio;
pub mod decoder;
pub mod demux;
pub mod playback;
pub mod player;
pub mod source;
pub mod utils;
pub mod video;

pub use playback::{CoreEvent, PlaybackCommand, PlaybackCore, PlaybackSnapshot};
pub use player::PlayerState;
pub use utils::config::Config;
pub use utils::error::{PlaybackError, Result};
