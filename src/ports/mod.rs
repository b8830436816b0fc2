//! Collaborator interfaces
//!
//! The recorder drives encoding, transcoding, probing and file management
//! through these traits:
//! - `MuxerFactory`/`Muxer` for writing segment files
//! - `Transcoder` for exporting merged compositions
//! - `MediaProbe` for reading segment layout
//! - `FileSystem` for moving and removing files

pub mod filesystem;
pub mod muxer;
pub mod probe;
pub mod source;
pub mod transcode;

pub use filesystem::{FileSystem, LocalFileSystem};
pub use muxer::{Muxer, MuxerFactory, TrackHandle, TrackSettings};
pub use probe::{AssetInfo, AudioTrackInfo, MediaProbe, VideoTrackInfo};
pub use source::FrameProcessor;
pub use transcode::{ExportCompletion, ExportRequest, ExportStatus, Transcoder};
