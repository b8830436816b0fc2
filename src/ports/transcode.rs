//! Transcode/export port
//!
//! Renders a composition of segment files into one output file.

use crate::export::{Composition, ExportQuality, VideoComposition};
use crate::media::MediaFormat;
use crate::utils::error::{RecorderError, RecorderResult};
use std::path::PathBuf;

/// Everything a transcoder needs to produce the final file
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub composition: Composition,
    /// Layer instructions; `None` plays tracks back as-is
    pub video_composition: Option<VideoComposition>,
    pub quality: ExportQuality,
    pub output: PathBuf,
    pub format: MediaFormat,
}

/// Terminal status of an export
#[derive(Debug)]
pub enum ExportStatus {
    Completed,
    Failed(RecorderError),
    Cancelled,
}

pub type ExportCompletion = Box<dyn FnOnce(ExportStatus) + Send + 'static>;

pub trait Transcoder: Send + Sync {
    /// Start exporting asynchronously. `completion` runs exactly once
    /// when the export ends, unless starting fails with `Err`.
    fn export(&self, request: ExportRequest, completion: ExportCompletion) -> RecorderResult<()>;
}
