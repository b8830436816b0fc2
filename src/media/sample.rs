//! Sample buffers
//!
//! Decoded, timestamped media samples as delivered by a capture source,
//! plus the frame types used when a frame is rendered before encoding.

use super::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of media carried by a sample or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => write!(f, "video"),
            MediaType::Audio => write!(f, "audio"),
        }
    }
}

/// Raw pixel layout of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }

    /// FFmpeg `-pix_fmt` name
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
        }
    }
}

/// Describes how a sample is encoded; used as a hint when creating tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FormatDescription {
    #[serde(rename_all = "camelCase")]
    Video {
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    },
    #[serde(rename_all = "camelCase")]
    Audio { sample_rate: u32, channels: u16 },
}

impl FormatDescription {
    pub fn media_type(&self) -> MediaType {
        match self {
            FormatDescription::Video { .. } => MediaType::Video,
            FormatDescription::Audio { .. } => MediaType::Audio,
        }
    }

    /// Video frame size, `None` for audio
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            FormatDescription::Video { width, height, .. } => Some((*width, *height)),
            FormatDescription::Audio { .. } => None,
        }
    }
}

/// A timestamped media sample
///
/// Video samples carry one packed frame; audio samples carry interleaved
/// signed 16-bit little-endian PCM.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub pts: MediaTime,
    pub duration: MediaTime,
    pub format: FormatDescription,
    pub data: Vec<u8>,
}

impl SampleBuffer {
    /// A video frame lasting `duration`
    pub fn video(
        pts: MediaTime,
        duration: MediaTime,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: Vec<u8>,
    ) -> Self {
        Self {
            pts,
            duration,
            format: FormatDescription::Video {
                width,
                height,
                pixel_format,
            },
            data,
        }
    }

    /// An audio buffer; its duration follows from the PCM frame count
    pub fn audio(pts: MediaTime, sample_rate: u32, channels: u16, data: Vec<u8>) -> Self {
        let bytes_per_frame = 2 * channels.max(1) as usize;
        let frames = (data.len() / bytes_per_frame) as i64;
        Self {
            pts,
            duration: MediaTime::new(frames, sample_rate as i32),
            format: FormatDescription::Audio {
                sample_rate,
                channels,
            },
            data,
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.format.media_type()
    }

    /// Presentation time of the end of this sample
    pub fn end(&self) -> MediaTime {
        self.pts + self.duration
    }
}

/// A frame produced by a post-processing hook, to be encoded in place of
/// the captured frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

/// A reusable frame buffer handed out by a pixel-buffer pool
#[derive(Debug)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let len = width as usize * height as usize * pixel_format.bytes_per_pixel();
        Self {
            width,
            height,
            pixel_format,
            data: vec![0; len],
        }
    }

    pub fn bytes_per_row(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }
}
