//! FFmpeg-backed media opener

use super::{DecodeOptions, MediaOpener, OpenedMedia};
use crate::decoder::{AudioCodec, AudioStreamInfo, FfmpegAudioCodec, FfmpegVideoCodec, MediaInfo, VideoStreamInfo};
use crate::decoder::DEFAULT_FRAME_RATE;
use crate::demux::FfmpegReader;
use crate::utils::error::{IntoPlaybackError, PlaybackError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{info, warn};
use once_cell::sync::OnceCell;
use std::path::Path;

static FFMPEG_INIT: OnceCell<()> = OnceCell::new();

/// Initialise FFmpeg once per process
fn init_ffmpeg() -> Result<()> {
    FFMPEG_INIT
        .get_or_try_init(|| {
            ffmpeg::init().open_err("FFmpeg initialisation")?;
            ffmpeg::log::set_level(ffmpeg::log::Level::Warning);
            Ok(())
        })
        .map(|_| ())
}

/// Opens files through libavformat/libavcodec
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegOpener;

impl FfmpegOpener {
    pub fn new() -> Self {
        Self
    }
}

impl MediaOpener for FfmpegOpener {
    fn open(&self, path: &Path, options: &DecodeOptions) -> Result<OpenedMedia> {
        init_ffmpeg()?;

        if !path.exists() {
            return Err(PlaybackError::Open(format!("{} does not exist", path.display())));
        }

        let input = format::input(&path).open_err(&path.display().to_string())?;

        let video_stream = input.streams()
            .best(media::Type::Video)
            .ok_or_else(|| PlaybackError::Open("no video stream".to_string()))?;
        let video_index = video_stream.index();
        let video = FfmpegVideoCodec::open(&video_stream, options.pixel_layout, options.decoder_threads)?;

        let rate = f64::from(video_stream.avg_frame_rate());
        let video_info = VideoStreamInfo {
            index: video_index,
            codec: video_stream.parameters().id().name().to_string(),
            width: video.width(),
            height: video.height(),
            fps: if rate.is_finite() && rate > 0.0 { rate } else { DEFAULT_FRAME_RATE },
            layout: options.pixel_layout,
        };

        let mut audio = None;
        let mut audio_info = None;
        if options.audio_enabled {
            if let Some(stream) = input.streams().best(media::Type::Audio) {
                match FfmpegAudioCodec::open(&stream) {
                    Ok(codec) => {
                        audio_info = Some(AudioStreamInfo {
                            index: stream.index(),
                            codec: stream.parameters().id().name().to_string(),
                            format: codec.format(),
                        });
                        audio = Some(codec);
                    }
                    Err(e) => warn!("Audio stream unusable, continuing without audio: {}", e),
                }
            }
        }

        let container = input.format().name().to_string();
        let reader = FfmpegReader::new(input, video_index, audio_info.as_ref().map(|a| a.index));

        let info = MediaInfo {
            source: path.display().to_string(),
            container,
            duration: reader.duration(),
            video: video_info,
            audio: audio_info,
        };
        info!("Opened {}", info);

        Ok(OpenedMedia {
            info,
            reader: Box::new(reader),
            video: Box::new(video),
            audio: audio.map(|codec| Box::new(codec) as Box<AudioCodec>),
        })
    }
}
