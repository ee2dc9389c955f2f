//! Synthetic test-pattern source
//!
//! Produces a fixed-length clip with a flat-colour picture per frame and a
//! 440 Hz tone, interleaved in timestamp order like a real container. Used by
//! the `--synthetic` CLI mode and by tests that need real threads and real
//! timing without media files.

use super::{DecodeOptions, MediaOpener, OpenedMedia};
use crate::decoder::{AudioChunk, AudioCodec, AudioFormat, AudioStreamInfo, CodecStatus, MediaInfo, Picture};
use crate::decoder::{PixelLayout, UnitCodec, VideoStreamInfo};
use crate::demux::{ContainerReader, Packet, PacketPayload, ReadOutcome, StreamKind};
use crate::utils::error::{PlaybackError, Result};
use log::debug;
use std::collections::VecDeque;
use std::path::Path;

/// Shape of the generated clip
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpec {
    /// Clip length in seconds
    pub duration: f64,

    pub fps: f64,
    pub width: u32,
    pub height: u32,

    /// Audio stream format, `None` for a silent clip
    pub audio: Option<AudioFormat>,

    /// Sample frames per audio packet
    pub chunk_frames: usize,

    /// Seconds between keyframes
    pub keyframe_interval: f64,

    /// Make every container seek fail
    pub fail_seek: bool,

    /// Make the video codec fail on the first frame at or after this time
    pub fail_decode_at: Option<f64>,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            duration: 10.0,
            fps: 30.0,
            width: 64,
            height: 36,
            audio: Some(AudioFormat { sample_rate: 48000, channels: 2 }),
            chunk_frames: 1024,
            keyframe_interval: 0.5,
            fail_seek: false,
            fail_decode_at: None,
        }
    }
}

impl SyntheticSpec {
    pub fn with_duration(duration: f64) -> Self {
        Self { duration, ..Self::default() }
    }

    fn total_video_frames(&self) -> u64 {
        (self.duration * self.fps).ceil().max(0.0) as u64
    }

    fn frames_per_keyframe(&self) -> u64 {
        ((self.keyframe_interval * self.fps).round() as u64).max(1)
    }
}

/// Opener that ignores the path and generates the configured clip
#[derive(Debug, Clone, Default)]
pub struct SyntheticOpener {
    spec: SyntheticSpec,
}

impl SyntheticOpener {
    pub fn new(spec: SyntheticSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &SyntheticSpec {
        &self.spec
    }
}

impl MediaOpener for SyntheticOpener {
    fn open(&self, path: &Path, options: &DecodeOptions) -> Result<OpenedMedia> {
        let spec = &self.spec;
        if !(spec.duration > 0.0) || !(spec.fps > 0.0) || spec.width == 0 || spec.height == 0 {
            return Err(PlaybackError::Open(format!("invalid synthetic clip {:?}", spec)));
        }

        let audio_format = spec.audio.filter(|_| options.audio_enabled);
        let info = MediaInfo {
            source: path.display().to_string(),
            container: "synthetic".to_string(),
            duration: spec.duration,
            video: VideoStreamInfo {
                index: 0,
                codec: "pattern".to_string(),
                width: spec.width,
                height: spec.height,
                fps: spec.fps,
                layout: options.pixel_layout,
            },
            audio: audio_format.map(|format| AudioStreamInfo {
                index: 1,
                codec: "tone".to_string(),
                format,
            }),
        };
        debug!("Synthetic source {}", info);

        Ok(OpenedMedia {
            info,
            reader: Box::new(SyntheticReader::new(spec.clone(), audio_format)),
            video: Box::new(PatternCodec::new(spec, options.pixel_layout)),
            audio: audio_format.map(|format| Box::new(ToneCodec::new(format)) as Box<AudioCodec>),
        })
    }
}

/// Interleaves video and audio packets by timestamp
struct SyntheticReader {
    spec: SyntheticSpec,
    audio: Option<AudioFormat>,
    next_frame: u64,
    next_chunk: u64,
}

impl SyntheticReader {
    fn new(spec: SyntheticSpec, audio: Option<AudioFormat>) -> Self {
        Self { spec, audio, next_frame: 0, next_chunk: 0 }
    }

    fn video_time(&self) -> f64 {
        self.next_frame as f64 / self.spec.fps
    }

    fn audio_time(&self, format: AudioFormat) -> f64 {
        (self.next_chunk * self.spec.chunk_frames as u64) as f64 / format.sample_rate as f64
    }

    fn video_packet(&mut self) -> Packet {
        let key = self.next_frame % self.spec.frames_per_keyframe() == 0;
        let pts = self.video_time();
        self.next_frame += 1;

        Packet {
            kind: StreamKind::Video,
            pts: Some(pts),
            duration: 1.0 / self.spec.fps,
            key,
            payload: PacketPayload::Bytes(Vec::new()),
        }
    }

    fn audio_packet(&mut self, format: AudioFormat) -> Packet {
        let total = (self.spec.duration * format.sample_rate as f64).ceil() as u64;
        let start = self.next_chunk * self.spec.chunk_frames as u64;
        let frames = (total - start).min(self.spec.chunk_frames as u64);
        let pts = self.audio_time(format);
        self.next_chunk += 1;

        Packet {
            kind: StreamKind::Audio,
            pts: Some(pts),
            duration: frames as f64 / format.sample_rate as f64,
            key: true,
            payload: PacketPayload::Bytes(Vec::new()),
        }
    }
}

impl ContainerReader for SyntheticReader {
    fn read_packet(&mut self) -> Result<ReadOutcome> {
        let video_time = self.video_time();
        let video_left = self.next_frame < self.spec.total_video_frames();
        let audio_next = self.audio
            .map(|format| (format, self.audio_time(format)))
            .filter(|&(_, time)| time < self.spec.duration);

        let packet = match audio_next {
            Some((format, audio_time)) if !video_left || audio_time < video_time => self.audio_packet(format),
            _ if video_left => self.video_packet(),
            _ => return Ok(ReadOutcome::End),
        };
        Ok(ReadOutcome::Packet(packet))
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        if self.spec.fail_seek {
            return Err(PlaybackError::Seek("synthetic seek failure".to_string()));
        }

        let per_key = self.spec.frames_per_keyframe();
        let frame = ((seconds * self.spec.fps).floor().max(0.0) as u64).min(self.spec.total_video_frames());
        self.next_frame = frame / per_key * per_key;

        let key_time = self.video_time();
        self.next_chunk = match self.audio {
            Some(format) => (key_time * format.sample_rate as f64 / self.spec.chunk_frames as f64).floor() as u64,
            None => 0,
        };
        Ok(())
    }

    fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Codec state shared by both synthetic codecs
#[derive(Default)]
struct PacketBacklog {
    pending: VecDeque<Packet>,
    end_submitted: bool,
}

impl PacketBacklog {
    fn next<U>(&mut self, unit: impl FnOnce(Packet) -> Result<U>) -> Result<CodecStatus<U>> {
        match self.pending.pop_front() {
            Some(packet) => Ok(CodecStatus::Unit(unit(packet)?)),
            None if self.end_submitted => Ok(CodecStatus::Finished),
            None => Ok(CodecStatus::NeedsInput),
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.end_submitted = false;
    }
}

/// One flat picture per packet, shaded by frame number
struct PatternCodec {
    backlog: PacketBacklog,
    width: u32,
    height: u32,
    fps: f64,
    layout: PixelLayout,
    fail_at: Option<f64>,
}

impl PatternCodec {
    fn new(spec: &SyntheticSpec, layout: PixelLayout) -> Self {
        Self {
            backlog: PacketBacklog::default(),
            width: spec.width,
            height: spec.height,
            fps: spec.fps,
            layout,
            fail_at: spec.fail_decode_at,
        }
    }
}

impl UnitCodec for PatternCodec {
    type Unit = Picture;

    fn receive(&mut self) -> Result<CodecStatus<Picture>> {
        let (width, height, fps, layout, fail_at) = (self.width, self.height, self.fps, self.layout, self.fail_at);

        self.backlog.next(|packet| {
            let pts = packet.pts.unwrap_or(0.0);
            if fail_at.map_or(false, |at| pts >= at) {
                return Err(PlaybackError::Decode(format!("pattern codec failure at {:.3}s", pts)));
            }

            let shade = ((pts * fps).round() as u64 % 256) as u8;
            Ok(Picture {
                timestamp: packet.pts,
                duration: 1.0 / fps,
                width,
                height,
                layout,
                data: vec![shade; layout.buffer_size(width, height)],
            })
        })
    }

    fn submit(&mut self, packet: Packet) -> Result<()> {
        self.backlog.pending.push_back(packet);
        Ok(())
    }

    fn submit_end(&mut self) -> Result<()> {
        self.backlog.end_submitted = true;
        Ok(())
    }

    fn flush(&mut self) {
        self.backlog.reset();
    }
}

/// 440 Hz tone, one chunk per packet
struct ToneCodec {
    backlog: PacketBacklog,
    format: AudioFormat,
}

const TONE_HZ: f64 = 440.0;
const TONE_LEVEL: f64 = 0.2;

impl ToneCodec {
    fn new(format: AudioFormat) -> Self {
        Self { backlog: PacketBacklog::default(), format }
    }
}

impl UnitCodec for ToneCodec {
    type Unit = AudioChunk;

    fn receive(&mut self) -> Result<CodecStatus<AudioChunk>> {
        let format = self.format;

        self.backlog.next(|packet| {
            let start = packet.pts.unwrap_or(0.0);
            let rate = format.sample_rate as f64;
            let frames = (packet.duration * rate).round() as usize;

            let mut samples = Vec::with_capacity(frames * format.channels as usize);
            for n in 0..frames {
                let t = start + n as f64 / rate;
                let value = ((t * TONE_HZ * std::f64::consts::TAU).sin() * TONE_LEVEL) as f32;
                samples.extend(std::iter::repeat(value).take(format.channels as usize));
            }

            Ok(AudioChunk {
                timestamp: packet.pts,
                frames,
                sample_rate: format.sample_rate,
                data: bytemuck::cast_slice::<f32, u8>(&samples).to_vec(),
            })
        })
    }

    fn submit(&mut self, packet: Packet) -> Result<()> {
        self.backlog.pending.push_back(packet);
        Ok(())
    }

    fn submit_end(&mut self) -> Result<()> {
        self.backlog.end_submitted = true;
        Ok(())
    }

    fn flush(&mut self) {
        self.backlog.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::TimedUnit;

    fn read_all(reader: &mut SyntheticReader) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let ReadOutcome::Packet(packet) = reader.read_packet().unwrap() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_reader_interleaves_in_time_order() {
        let spec = SyntheticSpec::with_duration(1.0);
        let mut reader = SyntheticReader::new(spec.clone(), spec.audio);
        let packets = read_all(&mut reader);

        let video = packets.iter().filter(|p| p.kind == StreamKind::Video).count();
        let audio: f64 = packets.iter()
            .filter(|p| p.kind == StreamKind::Audio)
            .map(|p| p.duration)
            .sum();
        assert_eq!(video, 30);
        assert!((audio - 1.0).abs() < 1e-9);

        let times: Vec<f64> = packets.iter().map(|p| p.pts.unwrap()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1] + 1.0 / 30.0));
    }

    #[test]
    fn test_seek_lands_on_keyframe_before_target() {
        let spec = SyntheticSpec::with_duration(10.0);
        let mut reader = SyntheticReader::new(spec.clone(), None);
        reader.seek(4.2).unwrap();

        let ReadOutcome::Packet(packet) = reader.read_packet().unwrap() else {
            panic!("expected a packet");
        };
        assert!(packet.key);
        assert_eq!(packet.pts, Some(4.0));
    }

    #[test]
    fn test_seek_failure_is_reported() {
        let spec = SyntheticSpec { fail_seek: true, ..SyntheticSpec::default() };
        let mut reader = SyntheticReader::new(spec, None);
        assert!(matches!(reader.seek(1.0), Err(PlaybackError::Seek(_))));
    }

    #[test]
    fn test_open_respects_audio_option() {
        let opener = SyntheticOpener::default();
        let options = DecodeOptions { audio_enabled: false, ..DecodeOptions::default() };
        let media = opener.open(Path::new("pattern"), &options).unwrap();

        assert!(media.audio.is_none());
        assert!(!media.reader.has_audio());
        assert_eq!(media.info.duration, 10.0);
    }

    #[test]
    fn test_codecs_emit_units() {
        let spec = SyntheticSpec::default();
        let mut video = PatternCodec::new(&spec, PixelLayout::Yuv420p);
        assert!(matches!(video.receive().unwrap(), CodecStatus::NeedsInput));

        let mut reader = SyntheticReader::new(spec.clone(), None);
        let ReadOutcome::Packet(packet) = reader.read_packet().unwrap() else {
            panic!("expected a packet");
        };
        video.submit(packet).unwrap();
        let CodecStatus::Unit(picture) = video.receive().unwrap() else {
            panic!("expected a picture");
        };
        assert_eq!(picture.data.len(), PixelLayout::Yuv420p.buffer_size(64, 36));

        video.submit_end().unwrap();
        assert!(matches!(video.receive().unwrap(), CodecStatus::Finished));

        let format = AudioFormat { sample_rate: 48000, channels: 2 };
        let mut tone = ToneCodec::new(format);
        tone.submit(Packet {
            kind: StreamKind::Audio,
            pts: Some(0.0),
            duration: 1024.0 / 48000.0,
            key: true,
            payload: PacketPayload::Bytes(Vec::new()),
        })
        .unwrap();
        let CodecStatus::Unit(chunk) = tone.receive().unwrap() else {
            panic!("expected audio");
        };
        assert_eq!(chunk.frames, 1024);
        assert_eq!(chunk.data.len(), 1024 * format.bytes_per_frame());
        assert!((chunk.duration() - 1024.0 / 48000.0).abs() < 1e-12);
    }
}
