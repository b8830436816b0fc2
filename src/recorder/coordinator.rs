//! Recording coordinator
//!
//! Sequences pause/resume cycles into a multi-segment recording. Each
//! start (or resume) allocates a segment and a writer for it; pause
//! finishes that writer; stop finishes the last one and merges every
//! segment into the destination.
//!
//! All session state sits behind one lock. Transition effects are
//! computed while it is held and run on the callback queue after it is
//! released, so delegates never observe a half-applied transition.

use super::delegate::RecordingDelegate;
use super::ingest::FormatCache;
use super::state::{transition_effects, RecordingOutcome, RecordingStatus, SessionEffect};
use crate::export::{FfmpegTranscoder, FfprobeProbe, MergeOptions, MergeOutcome, SegmentMerger};
use crate::media::{Attributes, DeviceOrientation, MediaType, SampleBuffer, Segment, VideoDimensions};
use crate::ports::{FileSystem, FrameProcessor, LocalFileSystem, MediaProbe, MuxerFactory, Transcoder};
use crate::settings::RecorderSettings;
use crate::utils::error::{RecorderError, RecorderResult};
use crate::utils::queue::SerialQueue;
use crate::writer::{FfmpegMuxerFactory, WriterContext, WriterCoordinator, WriterDelegate, WriterStatus};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Collaborators a recording session drives
#[derive(Clone)]
pub struct RecorderPorts {
    pub muxers: Arc<dyn MuxerFactory>,
    pub transcoder: Arc<dyn Transcoder>,
    pub probe: Arc<dyn MediaProbe>,
    pub files: Arc<dyn FileSystem>,
    /// Optional post-processing applied to video frames before encoding
    pub frame_processor: Option<Arc<dyn FrameProcessor>>,
}

impl RecorderPorts {
    /// FFmpeg-backed ports configured from `settings`
    pub fn ffmpeg(settings: &RecorderSettings) -> Self {
        Self {
            muxers: Arc::new(FfmpegMuxerFactory::new(
                &settings.ffmpeg_path,
                settings.frame_rate,
            )),
            transcoder: Arc::new(FfmpegTranscoder::new(&settings.ffmpeg_path)),
            probe: Arc::new(FfprobeProbe::new(&settings.ffprobe_path)),
            files: Arc::new(LocalFileSystem),
            frame_processor: None,
        }
    }

    pub fn with_frame_processor(mut self, processor: Arc<dyn FrameProcessor>) -> Self {
        self.frame_processor = Some(processor);
        self
    }
}

/// Runtime options of a recording session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// How segments are merged; the container format always follows the
    /// session's attributes
    pub merge: MergeOptions,
    pub segments_dir: Option<PathBuf>,
    pub max_pending_samples: usize,
    pub progress_interval_secs: f64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&RecorderSettings::default())
    }
}

impl From<&RecorderSettings> for SessionOptions {
    fn from(settings: &RecorderSettings) -> Self {
        Self {
            merge: MergeOptions {
                transitions: settings.transitions,
                transition_duration_secs: settings.transition_duration_secs,
                quality: settings.export_preset,
                ..MergeOptions::default()
            },
            segments_dir: settings.segments_dir.clone(),
            max_pending_samples: settings.max_pending_samples,
            progress_interval_secs: settings.progress_interval_secs,
        }
    }
}

struct SessionState {
    status: RecordingStatus,
    attributes: Attributes,
    segments: Vec<Segment>,
    /// The only writer this session acts on
    writer: Option<WriterCoordinator>,
    last_generation: u64,
    /// Reported when the session next becomes idle without an error
    outcome: Option<RecordingOutcome>,
}

/// Effects of one transition plus the data they need
struct Dispatch {
    effects: Vec<SessionEffect>,
    segments: Vec<Segment>,
    writer: Option<WriterCoordinator>,
    outcome: Option<RecordingOutcome>,
}

struct SessionInner {
    context: WriterContext,
    merger: SegmentMerger,
    frame_processor: Option<Arc<dyn FrameProcessor>>,
    options: SessionOptions,
    delegate: Arc<dyn RecordingDelegate>,
    state: Mutex<SessionState>,
    formats: Mutex<FormatCache>,
    closed: AtomicBool,
}

/// Manages a segmented recording session
pub struct RecordingCoordinator {
    inner: Arc<SessionInner>,
}

fn invalid_state(operation: &'static str, status: &RecordingStatus) -> RecorderError {
    RecorderError::InvalidState {
        operation,
        status: status.to_string(),
    }
}

impl RecordingCoordinator {
    /// Create an idle session recording into `attributes.destination()`
    pub fn new(
        attributes: Attributes,
        ports: RecorderPorts,
        options: SessionOptions,
        delegate: Arc<dyn RecordingDelegate>,
    ) -> RecorderResult<Self> {
        let context = WriterContext {
            muxers: ports.muxers,
            files: ports.files.clone(),
            background: Arc::new(SerialQueue::new("segment-recorder.background")?),
            callbacks: Arc::new(SerialQueue::new("segment-recorder.callbacks")?),
            max_pending_samples: options.max_pending_samples,
            progress_interval_secs: options.progress_interval_secs,
        };
        let merger = SegmentMerger::new(ports.probe, ports.transcoder, ports.files);

        tracing::info!("Recording session created for {:?}", attributes.destination());

        Ok(Self {
            inner: Arc::new(SessionInner {
                context,
                merger,
                frame_processor: ports.frame_processor,
                options,
                delegate,
                state: Mutex::new(SessionState {
                    status: RecordingStatus::default(),
                    attributes,
                    segments: Vec::new(),
                    writer: None,
                    last_generation: 0,
                    outcome: None,
                }),
                formats: Mutex::new(FormatCache::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Get the current recording status
    pub fn status(&self) -> RecordingStatus {
        self.inner.state.lock().status.clone()
    }

    /// Segments recorded so far in this session
    pub fn segments(&self) -> Vec<Segment> {
        self.inner.state.lock().segments.clone()
    }

    pub fn attributes(&self) -> Attributes {
        self.inner.state.lock().attributes.clone()
    }

    /// Replace the recording attributes. Only allowed while idle.
    pub fn set_attributes(&self, attributes: Attributes) -> RecorderResult<()> {
        let mut state = self.inner.state.lock();
        if !state.status.is_idle() {
            return Err(invalid_state("change attributes", &state.status));
        }
        state.attributes = attributes;
        Ok(())
    }

    /// Start a new segment, from idle or between segments.
    ///
    /// `dimensions` overrides the configured video dimensions for this and
    /// later segments.
    pub fn start_recording(
        &self,
        dimensions: Option<VideoDimensions>,
        orientation: DeviceOrientation,
    ) -> RecorderResult<()> {
        self.inner.start_recording(dimensions, orientation)
    }

    /// Finish the current segment and wait between segments
    pub fn pause(&self) -> RecorderResult<()> {
        let inner = &self.inner;
        let (writer, dispatch) = {
            let mut state = inner.state.lock();
            if !matches!(state.status, RecordingStatus::Recording) {
                return Err(invalid_state("pause", &state.status));
            }
            let dispatch = inner.transition(&mut state, RecordingStatus::Pause);
            (state.writer.clone(), dispatch)
        };

        inner.dispatch(dispatch);
        if let Some(writer) = writer {
            writer.finish_recording();
        }
        Ok(())
    }

    /// Stop the session. Unless `is_cancel`, every segment is merged into
    /// the destination; a cancelled session discards its segments.
    pub fn stop_recording(&self, is_cancel: bool) -> RecorderResult<()> {
        if is_cancel {
            return self.inner.cancel();
        }

        let inner = &self.inner;
        let (writer, dispatch) = {
            let mut state = inner.state.lock();
            match state.status {
                RecordingStatus::Recording | RecordingStatus::Pausing => {}
                _ => return Err(invalid_state("stop recording", &state.status)),
            }
            let writer = state.writer.clone();
            (writer, inner.transition(&mut state, RecordingStatus::StoppingRecording))
        };

        inner.dispatch(dispatch);
        match writer {
            // The merge starts once the writer has finished
            Some(writer) => writer.finish_recording(),
            None => inner.begin_merge(),
        }
        Ok(())
    }

    /// Delete the most recent segment. No-op without segments.
    pub fn remove_last_segment(&self) -> RecorderResult<()> {
        let removed = {
            let mut state = self.inner.state.lock();
            match state.status {
                RecordingStatus::Idle { .. } | RecordingStatus::Pausing => {}
                _ => return Err(invalid_state("remove a segment", &state.status)),
            }
            state.segments.pop()
        };

        if let Some(segment) = removed {
            tracing::info!("Removing segment {} at {:?}", segment.index, segment.location());
            self.inner.context.files.remove_if_exists(segment.location())?;
        }
        Ok(())
    }

    /// The capture device changed; the next sample of each media type
    /// only teaches its new format
    pub fn device_did_change(&self) {
        tracing::info!("Capture device changed, resetting formats");
        self.inner.formats.lock().reset();
    }

    /// A capture collaborator failed. An active session ends with `error`.
    pub fn capture_failed(&self, error: RecorderError) {
        tracing::error!("Capture failed: {}", error);
        self.inner.end_with_error(Arc::new(error));
    }

    /// Offer a captured sample. It reaches the current writer only while
    /// recording.
    pub fn ingest_sample(&self, sample: SampleBuffer) {
        let inner = &self.inner;
        if !inner.formats.lock().observe(&sample.format) {
            return;
        }
        if !inner.state.lock().status.is_recording() {
            return;
        }

        let rendered = match (&inner.frame_processor, sample.media_type()) {
            (Some(processor), MediaType::Video) => processor.process_video_frame(&sample),
            _ => None,
        };

        let state = inner.state.lock();
        if !state.status.is_recording() {
            return;
        }
        if let Some(writer) = &state.writer {
            writer.append_sample(sample, rendered);
        }
    }

    /// Wait until queued appends, background work and notifications have run
    #[cfg(test)]
    pub(crate) fn flush(&self) {
        let writer = self.inner.state.lock().writer.clone();
        if let Some(writer) = writer {
            writer.flush_writing_queue();
        }
        self.inner.context.background.flush();
        self.inner.context.callbacks.flush();
    }
}

impl Drop for RecordingCoordinator {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);

        let (writer, segments) = {
            let mut state = inner.state.lock();
            state.status = RecordingStatus::default();
            state.outcome = None;
            state.attributes.reset_destination();
            (state.writer.take(), std::mem::take(&mut state.segments))
        };

        if let Some(writer) = writer {
            writer.cancel_recording();
        }
        for segment in &segments {
            if let Err(e) = inner.context.files.remove_if_exists(segment.location()) {
                tracing::warn!("Failed to remove segment {:?}: {}", segment.location(), e);
            }
        }
    }
}

impl SessionInner {
    fn start_recording(
        self: &Arc<Self>,
        dimensions: Option<VideoDimensions>,
        orientation: DeviceOrientation,
    ) -> RecorderResult<()> {
        let (writer, dispatch) = {
            let mut state = self.state.lock();
            match state.status {
                RecordingStatus::Idle { .. } | RecordingStatus::Pausing => {}
                _ => return Err(invalid_state("start recording", &state.status)),
            }

            let format = state.attributes.media_format();
            let segment = Segment::allocate(
                state.segments.len(),
                state.attributes.destination(),
                self.options.segments_dir.as_deref(),
                format,
            );
            let generation = state.last_generation + 1;
            let link: Arc<dyn WriterDelegate> = Arc::new(WriterLink {
                session: Arc::downgrade(self),
                files: self.context.files.clone(),
            });
            let writer = WriterCoordinator::new(
                generation,
                segment.location().to_path_buf(),
                format,
                self.context.clone(),
                link,
            )?;

            if let Some(dimensions) = dimensions {
                state.attributes.apply_dimensions(dimensions);
            }
            state.attributes.set_orientation(orientation);
            state.attributes.repoint(segment.location().to_path_buf());
            state.last_generation = generation;

            let formats = self.formats.lock().clone();
            writer.add_video_track(
                formats.video(),
                state.attributes.video_compression().clone(),
                orientation.video_transform(),
            );
            writer.add_audio_track(formats.audio(), state.attributes.audio_compression().clone());

            tracing::info!(
                "Starting segment {} at {:?}",
                segment.index,
                segment.location()
            );
            state.segments.push(segment);
            state.writer = Some(writer.clone());

            let dispatch = self.transition(&mut state, RecordingStatus::StartingRecording);
            (writer, dispatch)
        };

        self.dispatch(dispatch);
        writer.prepare_to_record();
        Ok(())
    }

    fn cancel(self: &Arc<Self>) -> RecorderResult<()> {
        let dispatch = {
            let mut state = self.state.lock();
            match state.status {
                RecordingStatus::StartingRecording
                | RecordingStatus::Recording
                | RecordingStatus::Pause
                | RecordingStatus::Pausing => {}
                _ => return Err(invalid_state("cancel recording", &state.status)),
            }
            tracing::info!("Cancelling recording");
            state.outcome = Some(RecordingOutcome::Cancelled);
            self.transition(&mut state, RecordingStatus::Idle { error: None })
        };

        self.dispatch(dispatch);
        Ok(())
    }

    fn end_with_error(self: &Arc<Self>, error: Arc<RecorderError>) {
        let dispatch = {
            let mut state = self.state.lock();
            if state.status.is_idle() {
                return;
            }
            self.transition(&mut state, RecordingStatus::Idle { error: Some(error) })
        };
        self.dispatch(dispatch);
    }

    fn begin_merge(self: &Arc<Self>) {
        let (segments, destination, options) = {
            let state = self.state.lock();
            let options = MergeOptions {
                format: state.attributes.media_format(),
                ..self.options.merge.clone()
            };
            (
                state.segments.clone(),
                state.attributes.destination().to_path_buf(),
                options,
            )
        };

        tracing::info!("Merging {} segments into {:?}", segments.len(), destination);

        let inner = self.clone();
        let queued = self.context.background.execute(move || {
            let result = inner.merger.merge(&segments, &destination, &options);
            inner.finish_stop(result);
        });
        if !queued {
            self.finish_stop(Err(RecorderError::ExportSession(
                "background queue is not running".to_string(),
            )));
        }
    }

    fn finish_stop(self: &Arc<Self>, result: RecorderResult<MergeOutcome>) {
        let dispatch = {
            let mut state = self.state.lock();
            if !matches!(state.status, RecordingStatus::StoppingRecording) {
                return;
            }
            let status = match result {
                Ok(outcome) => {
                    state.outcome = Some(match outcome {
                        MergeOutcome::Nothing => RecordingOutcome::Empty,
                        MergeOutcome::Moved(path) | MergeOutcome::Exported(path) => {
                            RecordingOutcome::Completed(path)
                        }
                        MergeOutcome::Cancelled => RecordingOutcome::Cancelled,
                    });
                    RecordingStatus::Idle { error: None }
                }
                Err(error) => {
                    tracing::error!("Merging segments failed: {}", error);
                    RecordingStatus::Idle {
                        error: Some(Arc::new(error)),
                    }
                }
            };
            self.transition(&mut state, status)
        };
        self.dispatch(dispatch);
    }

    /// Move to `new` and collect the effects to run. The caller holds the
    /// state lock.
    fn transition(&self, state: &mut SessionState, new: RecordingStatus) -> Option<Dispatch> {
        let effects = transition_effects(&state.status, &new);
        let old = std::mem::replace(&mut state.status, new);
        tracing::info!("Recording status: {} -> {}", old, state.status);

        if effects.is_empty() {
            return None;
        }

        let mut dispatch = Dispatch {
            effects,
            segments: Vec::new(),
            writer: None,
            outcome: None,
        };

        if dispatch.effects.contains(&SessionEffect::Cleanup) {
            dispatch.writer = state.writer.take();
            dispatch.segments = std::mem::take(&mut state.segments);
            state.attributes.reset_destination();
            let outcome = state.outcome.take();
            dispatch.outcome = Some(match &state.status {
                RecordingStatus::Idle { error: Some(error) } => RecordingOutcome::Failed(error.clone()),
                _ => outcome.unwrap_or(RecordingOutcome::Empty),
            });
        } else if dispatch.effects.contains(&SessionEffect::NotifyDidPause) {
            dispatch.segments = state.segments.clone();
        }

        Some(dispatch)
    }

    fn dispatch(self: &Arc<Self>, dispatch: Option<Dispatch>) {
        if let Some(dispatch) = dispatch {
            let inner = self.clone();
            self.context.callbacks.execute(move || inner.perform(dispatch));
        }
    }

    fn perform(&self, dispatch: Dispatch) {
        let notify = !self.closed.load(Ordering::SeqCst);

        for effect in dispatch.effects.iter().copied() {
            match effect {
                SessionEffect::Cleanup => {
                    if let Some(writer) = &dispatch.writer {
                        writer.cancel_recording();
                    }
                    for segment in &dispatch.segments {
                        if let Err(e) = self.context.files.remove_if_exists(segment.location()) {
                            tracing::warn!(
                                "Failed to remove segment {:?}: {}",
                                segment.location(),
                                e
                            );
                        }
                    }
                }
                _ if !notify => {}
                SessionEffect::NotifyWillBegin => self.delegate.will_begin_recording(),
                SessionEffect::NotifyDidBegin => self.delegate.did_begin_recording(),
                SessionEffect::NotifyWillPause => self.delegate.will_pause(),
                SessionEffect::NotifyDidPause => self.delegate.did_pause(&dispatch.segments),
                SessionEffect::NotifyWillFinish => self.delegate.will_finish_recording(),
                SessionEffect::NotifyDidFinish => {
                    if let Some(outcome) = &dispatch.outcome {
                        tracing::info!("Recording finished: {:?}", outcome);
                        self.delegate.did_finish_recording(outcome);
                    }
                }
            }
        }
    }

    fn is_current(&self, state: &SessionState, writer: &WriterCoordinator) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && state
                .writer
                .as_ref()
                .is_some_and(|w| w.generation() == writer.generation())
    }

    fn writer_did_finish_preparing(self: &Arc<Self>, writer: &WriterCoordinator) {
        let dispatch = {
            let mut state = self.state.lock();
            if !self.is_current(&state, writer) {
                drop(state);
                discard_stale_writer(writer, self.context.files.as_ref());
                return;
            }
            if !matches!(state.status, RecordingStatus::StartingRecording) {
                return;
            }
            self.transition(&mut state, RecordingStatus::Recording)
        };
        self.dispatch(dispatch);
    }

    fn writer_did_finish_recording(self: &Arc<Self>, writer: &WriterCoordinator, elapsed_seconds: f64) {
        let (dispatch, merge) = {
            let mut state = self.state.lock();
            if !self.is_current(&state, writer) {
                drop(state);
                discard_stale_writer(writer, self.context.files.as_ref());
                return;
            }

            state.writer = None;
            if let Some(segment) = state
                .segments
                .iter_mut()
                .find(|s| s.location() == writer.path())
            {
                segment.duration_seconds = elapsed_seconds.max(0.0);
            }

            match state.status {
                RecordingStatus::Pause => (self.transition(&mut state, RecordingStatus::Pausing), false),
                RecordingStatus::StoppingRecording => (None, true),
                _ => (None, false),
            }
        };

        self.dispatch(dispatch);
        if merge {
            self.begin_merge();
        }
    }

    fn writer_did_fail(self: &Arc<Self>, writer: &WriterCoordinator, error: Arc<RecorderError>) {
        let dispatch = {
            let mut state = self.state.lock();
            if !self.is_current(&state, writer) {
                tracing::debug!("Ignoring failure of stale writer {}: {}", writer.generation(), error);
                return;
            }
            tracing::error!("Segment writer failed: {}", error);
            state.writer = None;
            self.transition(&mut state, RecordingStatus::Idle { error: Some(error) })
        };
        self.dispatch(dispatch);
    }

    fn writer_did_record(&self, writer: &WriterCoordinator, elapsed_seconds: f64) {
        let forward = {
            let state = self.state.lock();
            self.is_current(&state, writer) && state.status.is_recording()
        };
        if forward {
            self.delegate.did_record(elapsed_seconds);
        }
    }
}

/// Undo whatever a writer the session no longer tracks left behind
fn discard_stale_writer(writer: &WriterCoordinator, files: &dyn FileSystem) {
    tracing::debug!("Discarding stale writer {}", writer.generation());
    match writer.status() {
        WriterStatus::Recording => writer.cancel_recording(),
        WriterStatus::Finished => {
            if let Err(e) = files.remove_if_exists(writer.path()) {
                tracing::warn!("Failed to remove stale segment {:?}: {}", writer.path(), e);
            }
        }
        _ => {}
    }
}

/// Routes writer notifications to the session without keeping it alive
struct WriterLink {
    session: Weak<SessionInner>,
    files: Arc<dyn FileSystem>,
}

impl WriterDelegate for WriterLink {
    fn writer_did_finish_preparing(&self, writer: &WriterCoordinator) {
        match self.session.upgrade() {
            Some(session) => session.writer_did_finish_preparing(writer),
            None => discard_stale_writer(writer, self.files.as_ref()),
        }
    }

    fn writer_did_finish_recording(&self, writer: &WriterCoordinator, elapsed_seconds: f64) {
        match self.session.upgrade() {
            Some(session) => session.writer_did_finish_recording(writer, elapsed_seconds),
            None => discard_stale_writer(writer, self.files.as_ref()),
        }
    }

    fn writer_did_fail(&self, writer: &WriterCoordinator, error: Arc<RecorderError>) {
        if let Some(session) = self.session.upgrade() {
            session.writer_did_fail(writer, error);
        }
    }

    fn writer_did_record(&self, writer: &WriterCoordinator, elapsed_seconds: f64) {
        if let Some(session) = self.session.upgrade() {
            session.writer_did_record(writer, elapsed_seconds);
        }
    }
}
