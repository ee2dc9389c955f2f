//! FFmpeg codecs for ccsync
//!
//! Video frames are converted to the configured [`PixelLayout`] and copied
//! into a tightly packed buffer. Audio goes through a resampler configured at
//! open time that emits packed f32 at the source rate and channel count.

use super::{AudioChunk, AudioFormat, CodecStatus, PixelLayout, Picture, UnitCodec};
use super::{DEFAULT_FRAME_RATE, DEFAULT_SAMPLE_RATE};
use crate::demux::{Packet, PacketPayload};
use crate::utils::error::{PlaybackError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::{resampling, scaling};
use log::{debug, warn};

/// Scaler owned by a single codec
struct Scaler(scaling::Context);

// SAFETY: the scaling context is only touched by the codec that owns it, and
// the codec is used by one thread at a time behind the decoder lock.
unsafe impl Send for Scaler {}

/// Resampler owned by a single codec
struct Resampler(resampling::Context);

// SAFETY: as for `Scaler`.
unsafe impl Send for Resampler {}

/// Open a decoder context for the stream parameters
fn codec_context(parameters: ffmpeg::codec::Parameters, threads: usize) -> Result<ffmpeg::codec::context::Context> {
    let mut context = ffmpeg::codec::context::Context::from_parameters(parameters)
        .map_err(|e| PlaybackError::Open(format!("codec parameters: {}", e)))?;

    context.set_threading(ffmpeg::threading::Config {
        kind: ffmpeg::threading::Type::Frame,
        count: threads,
    });
    Ok(context)
}

fn submit_packet(decoder: &mut ffmpeg::codec::decoder::Opened, packet: Packet) -> Result<()> {
    let pts = packet.pts;
    let result = match packet.payload {
        PacketPayload::Codec(packet) => decoder.send_packet(&packet),
        PacketPayload::Bytes(bytes) => decoder.send_packet(&ffmpeg::Packet::copy(&bytes)),
    };

    match result {
        Ok(()) => Ok(()),
        Err(ffmpeg::Error::InvalidData) => {
            warn!("Dropping corrupt packet at {:?}", pts);
            Ok(())
        }
        Err(e) => Err(PlaybackError::Decode(format!("send_packet: {}", e))),
    }
}

fn submit_end(decoder: &mut ffmpeg::codec::decoder::Opened) -> Result<()> {
    match decoder.send_eof() {
        Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
        Err(e) => Err(PlaybackError::Decode(format!("send_eof: {}", e))),
    }
}

/// Map the receive error space onto codec status
fn receive_status<T>(result: std::result::Result<(), ffmpeg::Error>, unit: impl FnOnce() -> Result<T>) -> Result<CodecStatus<T>> {
    match result {
        Ok(()) => Ok(CodecStatus::Unit(unit()?)),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => Ok(CodecStatus::NeedsInput),
        Err(ffmpeg::Error::Eof) => Ok(CodecStatus::Finished),
        Err(e) => Err(PlaybackError::Decode(format!("receive_frame: {}", e))),
    }
}

/// Video codec producing packed pictures
pub struct FfmpegVideoCodec {
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<Scaler>,
    layout: PixelLayout,
    time_base: f64,
    frame_duration: f64,
    width: u32,
    height: u32,
}

impl FfmpegVideoCodec {
    /// Open the decoder for a video stream
    pub fn open(stream: &ffmpeg::format::stream::Stream, layout: PixelLayout, threads: usize) -> Result<Self> {
        let decoder = codec_context(stream.parameters(), threads)?
            .decoder()
            .video()
            .map_err(|e| PlaybackError::Open(format!("video decoder: {}", e)))?;

        let rate = f64::from(stream.avg_frame_rate());
        let fps = if rate.is_finite() && rate > 0.0 { rate } else { DEFAULT_FRAME_RATE };

        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(PlaybackError::Open(format!("invalid video size {}x{}", width, height)));
        }
        debug!("Video decoder {:?} {}x{} @ {:.3} fps", decoder.id(), width, height, fps);

        Ok(Self {
            decoder,
            scaler: None,
            layout,
            time_base: f64::from(stream.time_base()),
            frame_duration: 1.0 / fps,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn target_format(&self) -> ffmpeg::format::Pixel {
        match self.layout {
            PixelLayout::Rgba => ffmpeg::format::Pixel::RGBA,
            PixelLayout::Yuv420p => ffmpeg::format::Pixel::YUV420P,
        }
    }

    fn convert(&mut self, frame: &ffmpeg::frame::Video) -> Result<Picture> {
        let stale = match &self.scaler {
            Some(scaler) => {
                let input = scaler.0.input();
                input.width != frame.width() || input.height != frame.height() || input.format != frame.format()
            }
            None => true,
        };
        if stale {
            let context = scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                self.target_format(),
                self.width,
                self.height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| PlaybackError::Decode(format!("scaler: {}", e)))?;
            self.scaler = Some(Scaler(context));
        }

        let mut converted = ffmpeg::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.0.run(frame, &mut converted)
                .map_err(|e| PlaybackError::Decode(format!("scale: {}", e)))?;
        }

        let planes = self.layout.planes(self.width, self.height);
        let mut data = vec![0u8; self.layout.buffer_size(self.width, self.height)];
        for (index, plane) in planes.iter().enumerate() {
            let source = converted.data(index);
            let source_stride = converted.stride(index);
            for row in 0..plane.rows {
                let from = row * source_stride;
                let to = plane.offset + row * plane.stride;
                if from + plane.stride > source.len() {
                    break;
                }
                data[to..to + plane.stride].copy_from_slice(&source[from..from + plane.stride]);
            }
        }

        Ok(Picture {
            timestamp: frame.timestamp().or_else(|| frame.pts()).map(|ts| ts as f64 * self.time_base),
            duration: self.frame_duration,
            width: self.width,
            height: self.height,
            layout: self.layout,
            data,
        })
    }
}

impl UnitCodec for FfmpegVideoCodec {
    type Unit = Picture;

    fn receive(&mut self) -> Result<CodecStatus<Picture>> {
        let mut frame = ffmpeg::frame::Video::empty();
        let result = self.decoder.receive_frame(&mut frame);
        receive_status(result, || self.convert(&frame))
    }

    fn submit(&mut self, packet: Packet) -> Result<()> {
        submit_packet(&mut self.decoder, packet)
    }

    fn submit_end(&mut self) -> Result<()> {
        submit_end(&mut self.decoder)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// Audio codec producing interleaved f32 chunks
pub struct FfmpegAudioCodec {
    decoder: ffmpeg::codec::decoder::Audio,
    resampler: Resampler,
    input_layout: ffmpeg::ChannelLayout,
    format: AudioFormat,
    time_base: f64,
}

impl FfmpegAudioCodec {
    /// Open the decoder and a resampler to packed f32 at the source rate
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
        let decoder = codec_context(stream.parameters(), 1)?
            .decoder()
            .audio()
            .map_err(|e| PlaybackError::Open(format!("audio decoder: {}", e)))?;

        let sample_rate = if decoder.rate() > 0 { decoder.rate() } else { DEFAULT_SAMPLE_RATE };

        let mut input_layout = decoder.channel_layout();
        if input_layout.is_empty() || input_layout.channels() <= 0 {
            let channels = if decoder.channels() > 0 { decoder.channels() as i32 } else { 2 };
            input_layout = ffmpeg::ChannelLayout::default(channels);
        }
        let output_layout = ffmpeg::ChannelLayout::default(input_layout.channels());

        let resampler = resampling::Context::get(
            decoder.format(),
            input_layout,
            sample_rate,
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
            output_layout,
            sample_rate,
        )
        .map_err(|e| PlaybackError::Open(format!("resampler: {}", e)))?;

        let format = AudioFormat {
            sample_rate,
            channels: output_layout.channels().max(1) as u16,
        };
        debug!("Audio decoder {:?} {} Hz, {} channels", decoder.id(), format.sample_rate, format.channels);

        Ok(Self {
            decoder,
            resampler: Resampler(resampler),
            input_layout,
            format,
            time_base: f64::from(stream.time_base()),
        })
    }

    /// Output format of every chunk this codec produces
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    fn convert(&mut self, frame: &mut ffmpeg::frame::Audio) -> Result<AudioChunk> {
        if frame.channel_layout().is_empty() {
            frame.set_channel_layout(self.input_layout);
        }

        let mut converted = ffmpeg::frame::Audio::empty();
        self.resampler.0.run(frame, &mut converted)
            .map_err(|e| PlaybackError::Decode(format!("resample: {}", e)))?;

        let frames = converted.samples();
        let bytes = (frames * self.format.bytes_per_frame()).min(converted.data(0).len());

        Ok(AudioChunk {
            timestamp: frame.timestamp().or_else(|| frame.pts()).map(|ts| ts as f64 * self.time_base),
            frames: bytes / self.format.bytes_per_frame(),
            sample_rate: self.format.sample_rate,
            data: converted.data(0)[..bytes].to_vec(),
        })
    }
}

impl UnitCodec for FfmpegAudioCodec {
    type Unit = AudioChunk;

    fn receive(&mut self) -> Result<CodecStatus<AudioChunk>> {
        let mut frame = ffmpeg::frame::Audio::empty();
        let result = self.decoder.receive_frame(&mut frame);
        receive_status(result, || self.convert(&mut frame))
    }

    fn submit(&mut self, packet: Packet) -> Result<()> {
        submit_packet(&mut self.decoder, packet)
    }

    fn submit_end(&mut self) -> Result<()> {
        submit_end(&mut self.decoder)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}
