//! Segment merger
//!
//! Turns the segments of a recording into the single destination file:
//! nothing to do for no segments, a plain move for one, and a composition
//! exported through the transcoder for more.

use super::composition::concatenate;
use super::transition::TransitionCompositionBuilder;
use super::types::MergeOptions;
use crate::media::{MediaTime, Segment};
use crate::ports::{AssetInfo, ExportRequest, ExportStatus, FileSystem, MediaProbe, Transcoder};
use crate::utils::error::{RecorderError, RecorderResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Result of a merge that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// There were no segments
    Nothing,
    /// A single segment was moved into place
    Moved(PathBuf),
    /// Several segments were exported into one file
    Exported(PathBuf),
    /// The export was cancelled; no destination file was produced
    Cancelled,
}

impl MergeOutcome {
    pub fn destination(&self) -> Option<&Path> {
        match self {
            MergeOutcome::Moved(path) | MergeOutcome::Exported(path) => Some(path),
            MergeOutcome::Nothing | MergeOutcome::Cancelled => None,
        }
    }
}

pub struct SegmentMerger {
    probe: Arc<dyn MediaProbe>,
    transcoder: Arc<dyn Transcoder>,
    files: Arc<dyn FileSystem>,
}

impl SegmentMerger {
    pub fn new(
        probe: Arc<dyn MediaProbe>,
        transcoder: Arc<dyn Transcoder>,
        files: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            probe,
            transcoder,
            files,
        }
    }

    /// Merge `segments` into `destination`.
    ///
    /// Blocks the calling thread until the export completes, so it must
    /// not run on an async runtime thread. Source files are deleted once
    /// the destination has been written.
    pub fn merge(
        &self,
        segments: &[Segment],
        destination: &Path,
        options: &MergeOptions,
    ) -> RecorderResult<MergeOutcome> {
        match segments {
            [] => {
                tracing::info!("No segments to merge");
                Ok(MergeOutcome::Nothing)
            }
            [segment] => {
                self.move_into_place(segment.location(), destination)?;
                Ok(MergeOutcome::Moved(destination.to_path_buf()))
            }
            _ => self.merge_many(segments, destination, options),
        }
    }

    fn move_into_place(&self, source: &Path, destination: &Path) -> RecorderResult<()> {
        tracing::info!("Moving {:?} to {:?}", source, destination);
        self.files.move_item(source, destination)?;
        Ok(())
    }

    fn merge_many(
        &self,
        segments: &[Segment],
        destination: &Path,
        options: &MergeOptions,
    ) -> RecorderResult<MergeOutcome> {
        let mut assets = Vec::with_capacity(segments.len());
        for segment in segments {
            let asset = self.probe.probe(segment.location())?;
            if asset.duration > MediaTime::ZERO {
                assets.push(asset);
            } else {
                tracing::warn!("Skipping empty segment {:?}", segment.location());
            }
        }

        let outcome = match assets.len() {
            0 => {
                return Err(RecorderError::NoMediaData(
                    "every segment is empty".to_string(),
                ))
            }
            1 => {
                self.move_into_place(&assets[0].path, destination)?;
                MergeOutcome::Moved(destination.to_path_buf())
            }
            _ => self.export(assets, destination, options)?,
        };

        if matches!(outcome, MergeOutcome::Moved(_) | MergeOutcome::Exported(_)) {
            self.remove_sources(segments);
        }
        Ok(outcome)
    }

    fn export(
        &self,
        assets: Vec<AssetInfo>,
        destination: &Path,
        options: &MergeOptions,
    ) -> RecorderResult<MergeOutcome> {
        let (composition, video_composition) = if options.transitions {
            let built =
                TransitionCompositionBuilder::new(assets, options.transition_duration_secs).build()?;
            (built.composition, Some(built.video_composition))
        } else {
            (concatenate(&assets), None)
        };

        tracing::info!(
            "Exporting {:.3}s composition to {:?} (transitions: {})",
            composition.duration().seconds(),
            destination,
            options.transitions
        );

        // The transcoder refuses to overwrite
        self.files.remove_if_exists(destination)?;

        let request = ExportRequest {
            composition,
            video_composition,
            quality: options.quality,
            output: destination.to_path_buf(),
            format: options.format,
        };

        let (tx, rx) = oneshot::channel();
        self.transcoder.export(
            request,
            Box::new(move |status| {
                let _ = tx.send(status);
            }),
        )?;

        let status = rx.blocking_recv().map_err(|_| {
            RecorderError::ExportSession("export ended without reporting a status".to_string())
        })?;

        match status {
            ExportStatus::Completed => Ok(MergeOutcome::Exported(destination.to_path_buf())),
            ExportStatus::Cancelled => {
                tracing::info!("Export to {:?} was cancelled", destination);
                Ok(MergeOutcome::Cancelled)
            }
            ExportStatus::Failed(error) => Err(error),
        }
    }

    fn remove_sources(&self, segments: &[Segment]) {
        for segment in segments {
            if let Err(e) = self.files.remove_if_exists(segment.location()) {
                tracing::warn!("Failed to remove merged segment {:?}: {}", segment.location(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportQuality;
    use crate::media::MediaFormat;
    use crate::ports::LocalFileSystem;
    use crate::testing::{write_container, StubProbe, StubTranscoder, TranscoderBehavior};
    use std::fs;

    fn merger(behavior: TranscoderBehavior) -> (SegmentMerger, Arc<StubTranscoder>) {
        let transcoder = Arc::new(StubTranscoder::new(behavior));
        let merger = SegmentMerger::new(
            Arc::new(StubProbe),
            transcoder.clone(),
            Arc::new(LocalFileSystem),
        );
        (merger, transcoder)
    }

    fn segment(dir: &Path, index: usize, seconds: f64) -> Segment {
        let segment = Segment::allocate(index, &dir.join("out.mov"), None, MediaFormat::Mov);
        write_container(segment.location(), seconds, true);
        segment
    }

    fn options(transitions: bool, transition_duration_secs: f64) -> MergeOptions {
        MergeOptions {
            transitions,
            transition_duration_secs,
            quality: ExportQuality::Medium,
            format: MediaFormat::Mov,
        }
    }

    fn probed_duration(path: &Path) -> f64 {
        StubProbe.probe(path).unwrap().duration.seconds()
    }

    #[test]
    fn test_no_segments_is_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (merger, transcoder) = merger(TranscoderBehavior::Complete);
        let outcome = merger
            .merge(&[], &dir.path().join("out.mov"), &options(false, 0.6))
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Nothing);
        assert_eq!(transcoder.export_count(), 0);
    }

    #[test]
    fn test_single_segment_is_moved() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.mov");
        let only = segment(dir.path(), 0, 2.0);
        let (merger, transcoder) = merger(TranscoderBehavior::Complete);

        let outcome = merger.merge(&[only.clone()], &destination, &options(false, 0.6)).unwrap();

        assert_eq!(outcome, MergeOutcome::Moved(destination.clone()));
        assert!(!only.location().exists());
        assert!((probed_duration(&destination) - 2.0).abs() < 1e-6);
        assert_eq!(transcoder.export_count(), 0);
    }

    #[test]
    fn test_concatenation_sums_durations() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.mov");
        fs::write(&destination, b"stale").unwrap();
        let segments = vec![
            segment(dir.path(), 0, 1.0),
            segment(dir.path(), 1, 1.5),
            segment(dir.path(), 2, 0.5),
        ];
        let (merger, _) = merger(TranscoderBehavior::Complete);

        let outcome = merger.merge(&segments, &destination, &options(false, 0.6)).unwrap();

        assert_eq!(outcome, MergeOutcome::Exported(destination.clone()));
        assert!((probed_duration(&destination) - 3.0).abs() < 1.0 / 30.0);
        assert!(segments.iter().all(|s| !s.location().exists()));
    }

    #[test]
    fn test_transitions_overlap_segments() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.mov");
        let segments = vec![
            segment(dir.path(), 0, 1.0),
            segment(dir.path(), 1, 1.5),
            segment(dir.path(), 2, 2.0),
        ];
        let (merger, transcoder) = merger(TranscoderBehavior::Complete);

        merger.merge(&segments, &destination, &options(true, 0.24)).unwrap();

        let expected = 4.5 - 2.0 * 0.24;
        assert!((probed_duration(&destination) - expected).abs() < 1.0 / 30.0);
        assert!(transcoder.last_request_had_video_composition());
    }

    #[test]
    fn test_export_failure_keeps_sources() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.mov");
        let segments = vec![segment(dir.path(), 0, 1.0), segment(dir.path(), 1, 1.0)];
        let (merger, _) = merger(TranscoderBehavior::Fail);

        let result = merger.merge(&segments, &destination, &options(false, 0.6));

        assert!(matches!(result, Err(RecorderError::ExportSession(_))));
        assert!(segments.iter().all(|s| s.location().exists()));
        assert!(!destination.exists());
    }

    #[test]
    fn test_cancelled_export() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.mov");
        let segments = vec![segment(dir.path(), 0, 1.0), segment(dir.path(), 1, 1.0)];
        let (merger, _) = merger(TranscoderBehavior::Cancel);

        let outcome = merger.merge(&segments, &destination, &options(true, 0.6)).unwrap();

        assert_eq!(outcome, MergeOutcome::Cancelled);
        assert_eq!(outcome.destination(), None);
    }

    #[test]
    fn test_empty_segments_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.mov");
        let segments = vec![segment(dir.path(), 0, 0.0), segment(dir.path(), 1, 1.0)];
        let (merger, transcoder) = merger(TranscoderBehavior::Complete);

        let outcome = merger.merge(&segments, &destination, &options(true, 0.6)).unwrap();

        assert_eq!(outcome, MergeOutcome::Moved(destination.clone()));
        assert_eq!(transcoder.export_count(), 0);
        assert!(segments.iter().all(|s| !s.location().exists()));
    }
}
