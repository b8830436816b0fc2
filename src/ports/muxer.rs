//! Encoder/muxer port
//!
//! Interface to the component that compresses samples and multiplexes
//! them into a container file. A muxer is exclusively owned by one
//! segment writer.

use crate::media::{
    AudioCompressionSettings, FormatDescription, MediaFormat, MediaTime, MediaType, PixelBuffer,
    SampleBuffer, Transform, VideoCompressionSettings,
};
use crate::utils::error::RecorderResult;
use std::path::Path;

/// Identifies a track added to a muxer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub usize);

/// Compression configuration for a new track
#[derive(Debug, Clone, PartialEq)]
pub enum TrackSettings {
    Video {
        compression: VideoCompressionSettings,
        /// Display transform stored with the track
        transform: Transform,
    },
    Audio(AudioCompressionSettings),
}

impl TrackSettings {
    pub fn media_type(&self) -> MediaType {
        match self {
            TrackSettings::Video { .. } => MediaType::Video,
            TrackSettings::Audio(_) => MediaType::Audio,
        }
    }
}

/// A single muxing session writing one file
pub trait Muxer: Send {
    /// Add a track. `format_hint` describes the samples that will be
    /// appended, when known.
    fn add_track(
        &mut self,
        format_hint: Option<&FormatDescription>,
        settings: &TrackSettings,
    ) -> RecorderResult<TrackHandle>;

    /// Start writing. No tracks may be added afterwards.
    fn start(&mut self) -> RecorderResult<()>;

    /// Open the output timeline at `at`
    fn start_session(&mut self, at: MediaTime);

    /// Whether `track` can accept another sample without blocking
    fn is_ready_for_more_media_data(&self, track: TrackHandle) -> bool;

    /// Append a captured sample
    fn append(&mut self, track: TrackHandle, sample: &SampleBuffer) -> RecorderResult<()>;

    /// Append a rendered frame from the pixel-buffer pool
    fn append_pixel_buffer(
        &mut self,
        track: TrackHandle,
        buffer: &PixelBuffer,
        pts: MediaTime,
    ) -> RecorderResult<()>;

    /// Finalize the file. Blocks until the container is complete.
    fn finish(&mut self) -> RecorderResult<()>;

    /// Abort writing. Best effort; the partial file may remain.
    fn cancel(&mut self);
}

/// Opens muxing sessions
pub trait MuxerFactory: Send + Sync {
    fn open(&self, path: &Path, format: MediaFormat) -> RecorderResult<Box<dyn Muxer>>;
}
