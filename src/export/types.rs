//! Export types and configuration
//!
//! This module defines the quality presets and merge options used when
//! segments are combined into the final file.

use crate::media::MediaFormat;
use serde::{Deserialize, Serialize};

/// Default cross-fade length between segments, in seconds
pub const DEFAULT_TRANSITION_DURATION_SECS: f64 = 0.6;

/// Export quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportQuality {
    Low,
    #[default]
    Medium,
    High,
    Lossless,
}

impl ExportQuality {
    /// Get the CRF value for H.264 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            ExportQuality::Low => 28,
            ExportQuality::Medium => 23,
            ExportQuality::High => 18,
            // CRF 0 has compatibility issues with yuv420p
            ExportQuality::Lossless => 1,
        }
    }

    /// Get the FFmpeg preset for H.264 encoding
    pub fn h264_preset(&self) -> &'static str {
        match self {
            ExportQuality::Low => "faster",
            ExportQuality::Medium => "medium",
            ExportQuality::High => "slow",
            ExportQuality::Lossless => "veryslow",
        }
    }

    /// AAC bit rate for the merged audio track
    pub fn audio_bit_rate(&self) -> &'static str {
        match self {
            ExportQuality::Low => "96k",
            ExportQuality::Medium | ExportQuality::High => "192k",
            ExportQuality::Lossless => "320k",
        }
    }
}

/// How segments are merged into the destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOptions {
    /// Cross-fade between segments instead of cutting
    pub transitions: bool,
    /// Requested cross-fade length; clamped to half the shortest segment
    pub transition_duration_secs: f64,
    pub quality: ExportQuality,
    pub format: MediaFormat,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            transitions: false,
            transition_duration_secs: DEFAULT_TRANSITION_DURATION_SECS,
            quality: ExportQuality::Medium,
            format: MediaFormat::Mov,
        }
    }
}
