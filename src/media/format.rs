//! Recording configuration
//!
//! Container formats, compression settings and the `Attributes` a
//! recording session is started with.

use super::geometry::Transform;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::path::{Path, PathBuf};

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Mov,
    Mp4,
    M4v,
}

impl MediaFormat {
    /// Canonical filename extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Mov => "mov",
            MediaFormat::Mp4 => "mp4",
            MediaFormat::M4v => "m4v",
        }
    }

    /// FFmpeg muxer name
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            MediaFormat::Mov => "mov",
            MediaFormat::Mp4 => "mp4",
            MediaFormat::M4v => "ipod",
        }
    }

    /// Whether `path` carries this container's extension
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(self.extension()))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

impl VideoDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
}

impl VideoCodec {
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::Hevc => "libx265",
        }
    }
}

/// How frames are fitted into the encoded dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalingMode {
    /// Fill the frame, cropping overflow
    #[default]
    ResizeAspectFill,
    /// Fit inside the frame, letterboxing
    ResizeAspect,
    /// Stretch to the frame
    Resize,
}

impl ScalingMode {
    /// FFmpeg filter chain scaling an input into `width`x`height`
    pub fn ffmpeg_filter(&self, width: u32, height: u32) -> String {
        match self {
            ScalingMode::ResizeAspectFill => format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
                w = width,
                h = height
            ),
            ScalingMode::ResizeAspect => format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black",
                w = width,
                h = height
            ),
            ScalingMode::Resize => format!("scale={}:{}", width, height),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCompressionSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Average bit rate in bits per second (`None` lets the encoder decide)
    pub average_bit_rate: Option<u32>,
    /// Maximum frames between key frames
    pub max_key_frame_interval: Option<u32>,
    pub scaling_mode: ScalingMode,
    pub expected_frame_rate: u32,
}

impl VideoCompressionSettings {
    pub fn for_dimensions(dimensions: VideoDimensions) -> Self {
        Self {
            codec: VideoCodec::H264,
            width: dimensions.width,
            height: dimensions.height,
            average_bit_rate: None,
            max_key_frame_interval: None,
            scaling_mode: ScalingMode::ResizeAspectFill,
            expected_frame_rate: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Aac,
}

impl AudioCodec {
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCompressionSettings {
    pub codec: AudioCodec,
    pub channels: u16,
    pub sample_rate: u32,
    pub bit_rate: u32,
}

impl Default for AudioCompressionSettings {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Aac,
            channels: 1,
            sample_rate: 44100,
            bit_rate: 128_000,
        }
    }
}

/// Physical orientation of the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl DeviceOrientation {
    /// Display transform for frames from a landscape-native sensor
    pub fn video_transform(&self) -> Transform {
        match self {
            DeviceOrientation::Portrait => Transform::rotation(FRAC_PI_2),
            DeviceOrientation::PortraitUpsideDown => Transform::rotation(-FRAC_PI_2),
            DeviceOrientation::LandscapeRight => Transform::IDENTITY,
            DeviceOrientation::LandscapeLeft => Transform::rotation(PI),
        }
    }
}

/// Configuration of a recording
#[derive(Debug, Clone)]
pub struct Attributes {
    destination: PathBuf,
    working_destination: PathBuf,
    media_format: MediaFormat,
    video_dimensions: VideoDimensions,
    video_compression: VideoCompressionSettings,
    audio_compression: AudioCompressionSettings,
    orientation: DeviceOrientation,
}

impl Attributes {
    /// Create attributes with default compression settings.
    ///
    /// Fails if `destination` does not end in the format's extension.
    pub fn new(
        destination: impl Into<PathBuf>,
        video_dimensions: VideoDimensions,
        media_format: MediaFormat,
    ) -> RecorderResult<Self> {
        let destination = destination.into();
        if !media_format.matches(&destination) {
            return Err(RecorderError::Configuration(format!(
                "destination {:?} must use the .{} extension",
                destination,
                media_format.extension()
            )));
        }

        Ok(Self {
            working_destination: destination.clone(),
            destination,
            media_format,
            video_dimensions,
            video_compression: VideoCompressionSettings::for_dimensions(video_dimensions),
            audio_compression: AudioCompressionSettings::default(),
            orientation: DeviceOrientation::default(),
        })
    }

    /// Replace the video compression settings; width and height always
    /// follow the configured dimensions.
    pub fn with_video_compression(mut self, settings: VideoCompressionSettings) -> Self {
        self.video_compression = settings;
        self.apply_dimensions(self.video_dimensions);
        self
    }

    pub fn with_audio_compression(mut self, settings: AudioCompressionSettings) -> Self {
        self.audio_compression = settings;
        self
    }

    pub fn with_orientation(mut self, orientation: DeviceOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Path the active writer targets
    pub fn working_destination(&self) -> &Path {
        &self.working_destination
    }

    pub fn media_format(&self) -> MediaFormat {
        self.media_format
    }

    pub fn video_dimensions(&self) -> VideoDimensions {
        self.video_dimensions
    }

    pub fn video_compression(&self) -> &VideoCompressionSettings {
        &self.video_compression
    }

    pub fn audio_compression(&self) -> &AudioCompressionSettings {
        &self.audio_compression
    }

    pub fn orientation(&self) -> DeviceOrientation {
        self.orientation
    }

    pub(crate) fn set_orientation(&mut self, orientation: DeviceOrientation) {
        self.orientation = orientation;
    }

    pub(crate) fn apply_dimensions(&mut self, dimensions: VideoDimensions) {
        self.video_dimensions = dimensions;
        self.video_compression.width = dimensions.width;
        self.video_compression.height = dimensions.height;
    }

    pub(crate) fn repoint(&mut self, path: PathBuf) {
        self.working_destination = path;
    }

    pub(crate) fn reset_destination(&mut self) {
        self.working_destination = self.destination.clone();
    }
}
