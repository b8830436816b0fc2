//! Segment export module
//!
//! This module turns finished segments into the final recording file,
//! either cut back to back or joined with cross-fade transitions.

pub mod composition;
pub mod ffmpeg;
pub mod merger;
pub mod transition;
pub mod types;

pub use composition::{concatenate, Composition, CompositionTrack, TrackSegment};
pub use ffmpeg::{FfmpegTranscoder, FfprobeProbe};
pub use merger::{MergeOutcome, SegmentMerger};
pub use transition::{
    CompositionInstruction, LayerInstruction, TimeRanges, TransitionComposition,
    TransitionCompositionBuilder, VideoComposition,
};
pub use types::{ExportQuality, MergeOptions, DEFAULT_TRANSITION_DURATION_SECS};
