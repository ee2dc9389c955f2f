//! FFmpeg container reader
//!
//! Reads packets with `av_read_frame` semantics through ffmpeg-next and maps
//! stream indices to the video/audio queues chosen at open time.

use super::{ContainerReader, Packet, PacketPayload, ReadOutcome, StreamKind};
use crate::utils::error::{PlaybackError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format;
use log::debug;

/// Owned input context
struct InputContext(format::context::Input);

// SAFETY: the context is owned by exactly one reader, which is only ever
// used by one thread at a time (moved onto the read thread and back).
unsafe impl Send for InputContext {}

/// Container reader backed by an FFmpeg input context
pub struct FfmpegReader {
    input: InputContext,
    video_index: usize,
    audio_index: Option<usize>,
    video_time_base: f64,
    audio_time_base: f64,
}

impl FfmpegReader {
    /// Wrap an opened input, selecting the given stream indices
    pub fn new(input: format::context::Input, video_index: usize, audio_index: Option<usize>) -> Self {
        let time_base = |index: usize| {
            input.stream(index)
                .map(|stream| f64::from(stream.time_base()))
                .unwrap_or(0.0)
        };
        let video_time_base = time_base(video_index);
        let audio_time_base = audio_index.map(time_base).unwrap_or(0.0);

        Self {
            input: InputContext(input),
            video_index,
            audio_index,
            video_time_base,
            audio_time_base,
        }
    }

    /// Container duration in seconds (0 when unknown)
    pub fn duration(&self) -> f64 {
        let duration = self.input.0.duration();
        if duration > 0 {
            duration as f64 / ffmpeg_sys_next::AV_TIME_BASE as f64
        } else {
            0.0
        }
    }
}

impl ContainerReader for FfmpegReader {
    fn read_packet(&mut self) -> Result<ReadOutcome> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input.0) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(ReadOutcome::End),
            Err(e) => return Err(PlaybackError::Decode(format!("av_read_frame: {}", e))),
        }

        let index = packet.stream();
        let (kind, time_base) = if index == self.video_index {
            (StreamKind::Video, self.video_time_base)
        } else if Some(index) == self.audio_index {
            (StreamKind::Audio, self.audio_time_base)
        } else {
            return Ok(ReadOutcome::Skipped);
        };

        Ok(ReadOutcome::Packet(Packet {
            kind,
            pts: packet.pts().map(|pts| pts as f64 * time_base),
            duration: packet.duration() as f64 * time_base,
            key: packet.is_key(),
            payload: PacketPayload::Codec(packet),
        }))
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let target = (seconds * ffmpeg_sys_next::AV_TIME_BASE as f64) as i64;

        if let Err(e) = self.input.0.seek(target, i64::MIN..target) {
            debug!("avformat_seek_file failed ({}), retrying with av_seek_frame", e);

            // SAFETY: the pointer comes from a live input context we own exclusively.
            let ret = unsafe {
                ffmpeg_sys_next::av_seek_frame(
                    self.input.0.as_mut_ptr(),
                    -1,
                    target,
                    ffmpeg_sys_next::AVSEEK_FLAG_BACKWARD as i32,
                )
            };
            if ret < 0 {
                return Err(PlaybackError::Seek(ffmpeg::Error::from(ret).to_string()));
            }
        }

        // SAFETY: as above.
        unsafe {
            ffmpeg_sys_next::avformat_flush(self.input.0.as_mut_ptr());
        }
        Ok(())
    }

    fn has_audio(&self) -> bool {
        self.audio_index.is_some()
    }
}
