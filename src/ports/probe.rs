//! Media probe port
//!
//! Reads track layout and timing of a finished segment file so it can be
//! placed into a composition.

use crate::media::{MediaTime, Size, TimeRange, Transform};
use crate::utils::error::RecorderResult;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackInfo {
    /// Encoded frame size, before the preferred transform
    pub natural_size: Size,
    pub preferred_transform: Transform,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrackInfo {
    pub time_range: TimeRange,
}

/// Track layout of one media file
#[derive(Debug, Clone, PartialEq)]
pub struct AssetInfo {
    pub path: PathBuf,
    pub duration: MediaTime,
    pub video: Option<VideoTrackInfo>,
    pub audio: Option<AudioTrackInfo>,
}

pub trait MediaProbe: Send + Sync {
    /// Inspect `path`. A file without any media track is `NoMediaData`.
    fn probe(&self, path: &Path) -> RecorderResult<AssetInfo>;
}
