//! Recorded segments
//!
//! A segment is one continuous clip written by a single writer between a
//! start (or resume) and the next pause or stop.

use super::format::MediaFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Marker placed between the destination stem and the segment id
const SEGMENT_MARKER: &str = "---segment-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Position in recording order (0, 1, 2, ...)
    pub index: usize,

    location: PathBuf,

    /// Recorded duration, set once the segment's writer finishes
    pub duration_seconds: f64,

    /// Wall-clock time the segment was allocated
    pub created_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(index: usize, location: PathBuf) -> Self {
        Self {
            index,
            location,
            duration_seconds: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Allocate a segment next to `destination` (or inside `directory`).
    ///
    /// Every call yields a fresh file name, so a location is never handed
    /// to two segments.
    pub fn allocate(
        index: usize,
        destination: &Path,
        directory: Option<&Path>,
        format: MediaFormat,
    ) -> Self {
        let stem = destination
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "recording".to_string());
        let directory = directory
            .map(Path::to_path_buf)
            .or_else(|| destination.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let file_name = format!(
            "{}{}{}.{}",
            stem,
            SEGMENT_MARKER,
            uuid::Uuid::new_v4().simple(),
            format.extension()
        );
        Self::new(index, directory.join(file_name))
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_next_to_destination() {
        let segment = Segment::allocate(0, Path::new("/videos/take.mp4"), None, MediaFormat::Mp4);
        let location = segment.location();
        assert_eq!(location.parent(), Some(Path::new("/videos")));
        let name = location.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("take---segment-"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(segment.duration_seconds, 0.0);
    }

    #[test]
    fn test_allocate_never_reuses_location() {
        let dir = Path::new("/scratch");
        let a = Segment::allocate(0, Path::new("/videos/take.mov"), Some(dir), MediaFormat::Mov);
        let b = Segment::allocate(0, Path::new("/videos/take.mov"), Some(dir), MediaFormat::Mov);
        assert_ne!(a.location(), b.location());
        assert!(a.location().starts_with(dir));
    }
}
