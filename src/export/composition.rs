//! Composition model
//!
//! A composition places time ranges of segment files onto output tracks.
//! `concatenate` lays segments back to back; the transition builder
//! overlaps them and adds layer instructions.

use crate::media::{MediaTime, MediaType, Size, TimeRange, Transform};
use crate::ports::AssetInfo;
use std::path::{Path, PathBuf};

/// A range of a source file placed on a composition track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSegment {
    pub source: PathBuf,
    /// Range of the source that is used
    pub source_range: TimeRange,
    /// Where the range starts on the composition timeline
    pub target_start: MediaTime,
}

impl TrackSegment {
    pub fn target_range(&self) -> TimeRange {
        TimeRange::new(self.target_start, self.source_range.duration)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositionTrack {
    pub id: usize,
    pub media_type: MediaType,
    pub preferred_transform: Transform,
    /// Frame size of the first video placed on the track
    pub natural_size: Option<Size>,
    pub segments: Vec<TrackSegment>,
}

impl CompositionTrack {
    /// Place `range` of `source` at `at` on this track
    pub fn insert_time_range(&mut self, source: &Path, range: TimeRange, at: MediaTime) {
        self.segments.push(TrackSegment {
            source: source.to_path_buf(),
            source_range: range,
            target_start: at,
        });
        self.segments.sort_by(|a, b| a.target_start.cmp(&b.target_start));
    }

    /// End of the last segment on the track
    pub fn end(&self) -> MediaTime {
        self.segments
            .iter()
            .map(|s| s.target_range().end())
            .max()
            .unwrap_or(MediaTime::ZERO)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composition {
    pub tracks: Vec<CompositionTrack>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty track and return its id
    pub fn add_track(
        &mut self,
        media_type: MediaType,
        preferred_transform: Transform,
        natural_size: Option<Size>,
    ) -> usize {
        let id = self.tracks.len();
        self.tracks.push(CompositionTrack {
            id,
            media_type,
            preferred_transform,
            natural_size,
            segments: Vec::new(),
        });
        id
    }

    pub fn track(&self, id: usize) -> Option<&CompositionTrack> {
        self.tracks.get(id)
    }

    pub fn tracks_of(&self, media_type: MediaType) -> impl Iterator<Item = &CompositionTrack> {
        self.tracks.iter().filter(move |t| t.media_type == media_type)
    }

    /// End of the longest track
    pub fn duration(&self) -> MediaTime {
        self.tracks
            .iter()
            .map(CompositionTrack::end)
            .max()
            .unwrap_or(MediaTime::ZERO)
    }

    /// Display size of the first video track, after its transform
    pub fn natural_size(&self) -> Option<Size> {
        self.tracks_of(MediaType::Video)
            .find_map(|t| t.natural_size.map(|s| t.preferred_transform.apply_to_size(s)))
    }
}

/// Append `range` of `source` to `track` at `time`, clipped so it does not
/// extend past `bounds`. Returns the time the appended range ends.
fn append_track(
    track: &mut CompositionTrack,
    source: &Path,
    range: TimeRange,
    time: MediaTime,
    bounds: Option<MediaTime>,
) -> MediaTime {
    let mut range = range;
    let time = time + range.start;

    if let Some(bounds) = bounds {
        let current_bounds = time + range.duration;
        if current_bounds > bounds {
            range.duration = range.duration - (current_bounds - bounds);
        }
    }

    if range.duration > MediaTime::ZERO {
        track.insert_time_range(source, range, time);
        return time + range.duration;
    }
    time
}

/// Lay the video and audio of each asset back to back, in order.
///
/// Each asset's audio is clipped to the end of its video so the tracks
/// stay in step. The composition video track takes the preferred
/// transform of the first asset that has video.
pub fn concatenate(assets: &[AssetInfo]) -> Composition {
    let mut composition = Composition::new();
    let mut video_track: Option<usize> = None;
    let mut audio_track: Option<usize> = None;

    let mut current = composition.duration();

    for asset in assets {
        let mut max_bounds = None;

        if let Some(video) = &asset.video {
            let id = *video_track.get_or_insert_with(|| {
                composition.add_track(
                    MediaType::Video,
                    video.preferred_transform,
                    Some(video.natural_size),
                )
            });
            let video_end = append_track(
                &mut composition.tracks[id],
                &asset.path,
                video.time_range,
                current,
                max_bounds,
            );
            max_bounds = Some(video_end);
        }

        if let Some(audio) = &asset.audio {
            let id = *audio_track.get_or_insert_with(|| {
                composition.add_track(MediaType::Audio, Transform::IDENTITY, None)
            });
            append_track(
                &mut composition.tracks[id],
                &asset.path,
                audio.time_range,
                current,
                max_bounds,
            );
        }

        current = composition.duration();
    }

    composition
}
