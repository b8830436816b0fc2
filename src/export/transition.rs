//! Transition composition builder
//!
//! Builds a cross-fade composition from finished segments. Segments
//! alternate between two video tracks (A/B) and two audio tracks so that
//! neighbours can overlap; each overlap window becomes a transition
//! instruction in which the outgoing layer fades out over the incoming one.

use super::composition::Composition;
use crate::media::{MediaTime, MediaType, Size, TimeRange, Transform};
use crate::ports::AssetInfo;
use crate::utils::error::{RecorderError, RecorderResult};

/// Timescale transition durations are expressed in
const TRANSITION_TIMESCALE: i32 = 600;

/// Instruction granularity of the video composition
pub const COMPOSITION_FRAME_RATE: i32 = 30;

/// How one composition video track is drawn during an instruction
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInstruction {
    pub track: usize,
    /// Maps the track's frames into render space
    pub transform: Transform,
    /// Linear opacity ramp `(start, end)` over the instruction's range;
    /// `None` is fully opaque
    pub opacity_ramp: Option<(f32, f32)>,
}

/// Layers to draw over a range of the output timeline, topmost first
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionInstruction {
    pub time_range: TimeRange,
    pub layers: Vec<LayerInstruction>,
}

impl CompositionInstruction {
    pub fn is_transition(&self) -> bool {
        self.layers.len() > 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoComposition {
    pub instructions: Vec<CompositionInstruction>,
    pub render_size: Size,
    pub frame_duration: MediaTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionComposition {
    pub composition: Composition,
    pub video_composition: VideoComposition,
}

/// Pass-through and transition ranges of a transition composition
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRanges {
    pub pass_through: Vec<TimeRange>,
    pub transitions: Vec<TimeRange>,
}

pub struct TransitionCompositionBuilder {
    assets: Vec<AssetInfo>,
    transition_duration: MediaTime,
}

impl TransitionCompositionBuilder {
    /// Prepare a builder for `assets` in playback order.
    ///
    /// Assets without duration are left out. The transition is clamped to
    /// half of the shortest remaining asset.
    pub fn new(assets: Vec<AssetInfo>, transition_duration_secs: f64) -> Self {
        let assets: Vec<AssetInfo> = assets
            .into_iter()
            .filter(|asset| {
                let keep = asset.duration.is_positive();
                if !keep {
                    tracing::warn!("Skipping empty segment {:?}", asset.path);
                }
                keep
            })
            .collect();

        let requested =
            MediaTime::from_seconds(transition_duration_secs.max(0.0), TRANSITION_TIMESCALE);
        let transition_duration = assets
            .iter()
            .map(|asset| half(asset.duration))
            .min()
            .map(|limit| requested.min(limit))
            .unwrap_or(requested);

        Self {
            assets,
            transition_duration,
        }
    }

    pub fn transition_duration(&self) -> MediaTime {
        self.transition_duration
    }

    pub fn assets(&self) -> &[AssetInfo] {
        &self.assets
    }

    pub fn build(&self) -> RecorderResult<TransitionComposition> {
        if self.assets.is_empty() {
            return Err(RecorderError::NoMediaData(
                "no segments to compose".to_string(),
            ));
        }
        if let Some(asset) = self.assets.iter().find(|a| a.video.is_none()) {
            return Err(RecorderError::NoMediaData(format!(
                "segment {:?} has no video track",
                asset.path
            )));
        }

        let (composition, video_tracks) = self.build_composition_tracks();
        let ranges = self.calculate_time_ranges();
        let video_composition = self.build_video_composition(&video_tracks, &ranges);

        tracing::info!(
            "Built transition composition: {} segments, {:.3}s transitions, {:.3}s total",
            self.assets.len(),
            self.transition_duration.seconds(),
            composition.duration().seconds()
        );

        Ok(TransitionComposition {
            composition,
            video_composition,
        })
    }

    /// Lay each asset on alternating A/B tracks, overlapping neighbours by
    /// the transition duration
    fn build_composition_tracks(&self) -> (Composition, [usize; 2]) {
        let mut composition = Composition::new();
        let first = self.assets[0].video.as_ref();
        let size = first.map(|v| v.natural_size);
        let transform = first.map(|v| v.preferred_transform).unwrap_or_default();

        let video_tracks = [
            composition.add_track(MediaType::Video, transform, size),
            composition.add_track(MediaType::Video, transform, size),
        ];
        let audio_tracks = [
            composition.add_track(MediaType::Audio, Transform::IDENTITY, None),
            composition.add_track(MediaType::Audio, Transform::IDENTITY, None),
        ];

        let mut cursor = MediaTime::ZERO;
        for (i, asset) in self.assets.iter().enumerate() {
            let range = TimeRange::new(MediaTime::ZERO, asset.duration);

            composition.tracks[video_tracks[i % 2]].insert_time_range(&asset.path, range, cursor);
            if asset.audio.is_some() {
                composition.tracks[audio_tracks[i % 2]].insert_time_range(&asset.path, range, cursor);
            }

            cursor = cursor + asset.duration - self.transition_duration;
        }

        (composition, video_tracks)
    }

    /// Ranges where one segment plays alone, and where neighbours overlap
    pub fn calculate_time_ranges(&self) -> TimeRanges {
        let t = self.transition_duration;
        let count = self.assets.len();
        let mut pass_through = Vec::with_capacity(count);
        let mut transitions = Vec::with_capacity(count.saturating_sub(1));
        let mut cursor = MediaTime::ZERO;

        for (i, asset) in self.assets.iter().enumerate() {
            let mut range = TimeRange::new(cursor, asset.duration);
            if i > 0 {
                range.start = range.start + t;
                range.duration = range.duration - t;
            }
            if i + 1 < count {
                range.duration = range.duration - t;
            }
            pass_through.push(range);

            cursor = cursor + asset.duration - t;
            if i + 1 < count {
                transitions.push(TimeRange::new(cursor, t));
            }
        }

        TimeRanges {
            pass_through,
            transitions,
        }
    }

    fn build_video_composition(
        &self,
        video_tracks: &[usize; 2],
        ranges: &TimeRanges,
    ) -> VideoComposition {
        let corrections: Vec<Transform> = self
            .assets
            .iter()
            .map(|asset| match &asset.video {
                Some(video) => orientation_correction(video.natural_size, video.preferred_transform),
                None => Transform::IDENTITY,
            })
            .collect();

        let mut instructions = Vec::with_capacity(ranges.pass_through.len() * 2);

        for (i, pass_through) in ranges.pass_through.iter().enumerate() {
            let track_index = i % 2;

            instructions.push(CompositionInstruction {
                time_range: *pass_through,
                layers: vec![LayerInstruction {
                    track: video_tracks[track_index],
                    transform: corrections[i],
                    opacity_ramp: None,
                }],
            });

            if let Some(transition) = ranges.transitions.get(i) {
                let from = LayerInstruction {
                    track: video_tracks[track_index],
                    transform: corrections[i],
                    opacity_ramp: Some((1.0, 0.0)),
                };
                let to = LayerInstruction {
                    track: video_tracks[1 - track_index],
                    transform: corrections[i + 1],
                    opacity_ramp: None,
                };
                instructions.push(CompositionInstruction {
                    time_range: *transition,
                    layers: vec![from, to],
                });
            }
        }

        let render_size = self.assets[0]
            .video
            .as_ref()
            .map(|v| v.preferred_transform.apply_to_size(v.natural_size))
            .unwrap_or_default();

        VideoComposition {
            instructions,
            render_size,
            frame_duration: MediaTime::new(1, COMPOSITION_FRAME_RATE),
        }
    }
}

/// Half of `time`, exact where the timescale allows
fn half(time: MediaTime) -> MediaTime {
    if time.value % 2 == 0 {
        MediaTime::new(time.value / 2, time.timescale)
    } else if time.timescale <= i32::MAX / 2 {
        MediaTime::new(time.value, time.timescale * 2)
    } else {
        MediaTime::from_seconds(time.seconds() / 2.0, TRANSITION_TIMESCALE)
    }
}

/// Transform that draws a track upright with its top-left corner at the
/// render origin.
///
/// A track whose preferred transform rotates it (portrait footage from a
/// landscape sensor) would otherwise be drawn partly outside the render
/// area, so the rotation is followed by a translation back into view.
pub fn orientation_correction(natural_size: Size, preferred: Transform) -> Transform {
    if preferred.quarter_turns() == 0 {
        return preferred;
    }

    let corners = [
        (0.0, 0.0),
        (natural_size.width, 0.0),
        (0.0, natural_size.height),
        (natural_size.width, natural_size.height),
    ];
    let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
    for (x, y) in corners {
        min_x = min_x.min(preferred.a * x + preferred.c * y + preferred.tx);
        min_y = min_y.min(preferred.b * x + preferred.d * y + preferred.ty);
    }

    preferred.then(&Transform::translation(-min_x, -min_y))
}
