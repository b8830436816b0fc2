//! Segment writer module
//!
//! One `WriterCoordinator` per segment file:
//! - `status` defines the writer lifecycle and its transition effects
//! - `coordinator` drives a muxer through that lifecycle
//! - `pool` holds reusable frame buffers for rendered frames
//! - `ffmpeg` is the FFmpeg-backed muxer

pub mod coordinator;
pub mod ffmpeg;
pub mod pool;
pub mod status;

pub use coordinator::{WriterContext, WriterCoordinator, WriterDelegate};
pub use ffmpeg::{FfmpegMuxer, FfmpegMuxerFactory};
pub use pool::PixelBufferPool;
pub use status::{transition_effects, WriterEffect, WriterStatus};
