//! Segment writer coordinator
//!
//! Owns exactly one muxing session writing exactly one segment file, and
//! drives it through the [`WriterStatus`] lifecycle:
//! Idle → PreparingToRecord → Recording → FinishingPart1 → FinishingPart2
//! → Finished, or Failed from any working status.
//!
//! Status reads and writes go through one mutex. Appends and finalization
//! run in order on the writer's own serial queue. Transition side effects
//! and delegate notifications run on the shared callback queue, after the
//! status lock has been released.

use super::pool::PixelBufferPool;
use super::status::{transition_effects, WriterEffect, WriterStatus};
use crate::media::{
    AudioCompressionSettings, FormatDescription, MediaFormat, MediaTime, MediaType, PixelFormat,
    RenderedImage, SampleBuffer, Transform, VideoCompressionSettings,
};
use crate::ports::{FileSystem, Muxer, MuxerFactory, TrackHandle, TrackSettings};
use crate::utils::error::{RecorderError, RecorderResult};
use crate::utils::queue::SerialQueue;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PIXEL_BUFFER_POOL_CAPACITY: usize = 4;

/// Receives writer lifecycle notifications on the callback queue
pub trait WriterDelegate: Send + Sync {
    /// The muxer is open and samples are being accepted
    fn writer_did_finish_preparing(&self, writer: &WriterCoordinator);

    /// The segment file is complete
    fn writer_did_finish_recording(&self, writer: &WriterCoordinator, elapsed_seconds: f64);

    /// The writer failed; its partial file has been removed
    fn writer_did_fail(&self, writer: &WriterCoordinator, error: Arc<RecorderError>);

    /// Periodic progress of the segment being written
    fn writer_did_record(&self, writer: &WriterCoordinator, elapsed_seconds: f64);
}

/// Collaborators and queues shared by every writer of a session
#[derive(Clone)]
pub struct WriterContext {
    pub muxers: Arc<dyn MuxerFactory>,
    pub files: Arc<dyn FileSystem>,
    /// Context the muxer is opened on
    pub background: Arc<SerialQueue>,
    /// Context all notifications are delivered on
    pub callbacks: Arc<SerialQueue>,
    /// Appends allowed to wait on the writing queue before samples are dropped
    pub max_pending_samples: usize,
    /// Minimum media time between progress notifications
    pub progress_interval_secs: f64,
}

#[derive(Clone)]
struct TrackConfig {
    format_hint: Option<FormatDescription>,
    settings: TrackSettings,
}

#[derive(Default)]
struct WriterState {
    status: WriterStatus,
    video: Option<TrackConfig>,
    audio: Option<TrackConfig>,
}

#[derive(Default)]
struct MuxerOutput {
    muxer: Option<Box<dyn Muxer>>,
    video: Option<TrackHandle>,
    audio: Option<TrackHandle>,
    pool: Option<PixelBufferPool>,
    session_start: Option<MediaTime>,
    last_timestamp: Option<MediaTime>,
    last_progress: Option<f64>,
}

impl MuxerOutput {
    fn elapsed_seconds(&self) -> f64 {
        match (self.session_start, self.last_timestamp) {
            (Some(start), Some(last)) => (last - start).seconds().max(0.0),
            _ => 0.0,
        }
    }

    fn progress_due(&mut self, interval: f64) -> Option<f64> {
        let elapsed = self.elapsed_seconds();
        let due = match self.last_progress {
            Some(previous) => elapsed - previous >= interval,
            None => true,
        };
        if due {
            self.last_progress = Some(elapsed);
            Some(elapsed)
        } else {
            None
        }
    }
}

struct WriterInner {
    generation: u64,
    path: PathBuf,
    format: MediaFormat,
    context: WriterContext,
    delegate: Arc<dyn WriterDelegate>,
    writing: SerialQueue,
    state: Mutex<WriterState>,
    output: Mutex<MuxerOutput>,
    pending: AtomicUsize,
}

/// Handle to a segment writer. Clones refer to the same writer.
#[derive(Clone)]
pub struct WriterCoordinator {
    inner: Arc<WriterInner>,
}

impl WriterCoordinator {
    /// Create an idle writer targeting `path`. `generation` identifies the
    /// writer to its delegate.
    pub fn new(
        generation: u64,
        path: PathBuf,
        format: MediaFormat,
        context: WriterContext,
        delegate: Arc<dyn WriterDelegate>,
    ) -> RecorderResult<Self> {
        let writing = SerialQueue::new(format!("segment-recorder.writing.{}", generation))?;
        Ok(Self {
            inner: Arc::new(WriterInner {
                generation,
                path,
                format,
                context,
                delegate,
                writing,
                state: Mutex::new(WriterState::default()),
                output: Mutex::new(MuxerOutput::default()),
                pending: AtomicUsize::new(0),
            }),
        })
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn status(&self) -> WriterStatus {
        self.inner.state.lock().status.clone()
    }

    /// Configure the video track. Ignored unless idle.
    pub fn add_video_track(
        &self,
        format_hint: Option<FormatDescription>,
        compression: VideoCompressionSettings,
        transform: Transform,
    ) {
        let mut state = self.inner.state.lock();
        if !matches!(state.status, WriterStatus::Idle) {
            tracing::debug!("Ignoring video track for writer in status {}", state.status);
            return;
        }
        state.video = Some(TrackConfig {
            format_hint,
            settings: TrackSettings::Video {
                compression,
                transform,
            },
        });
    }

    /// Configure the audio track. Ignored unless idle.
    pub fn add_audio_track(
        &self,
        format_hint: Option<FormatDescription>,
        compression: AudioCompressionSettings,
    ) {
        let mut state = self.inner.state.lock();
        if !matches!(state.status, WriterStatus::Idle) {
            tracing::debug!("Ignoring audio track for writer in status {}", state.status);
            return;
        }
        state.audio = Some(TrackConfig {
            format_hint,
            settings: TrackSettings::Audio(compression),
        });
    }

    /// Open the muxer on the background queue. Moves to `Recording` on
    /// success, `Failed` otherwise.
    pub fn prepare_to_record(&self) {
        {
            let mut state = self.inner.state.lock();
            if !matches!(state.status, WriterStatus::Idle) {
                return;
            }
            state.status = WriterStatus::PreparingToRecord;
        }

        tracing::info!("Preparing writer {} for {:?}", self.inner.generation, self.inner.path);

        let inner = self.inner.clone();
        if !self.inner.context.background.execute(move || inner.open_muxer()) {
            self.inner.fail(RecorderError::MuxerStart(
                "background queue is not running".to_string(),
            ));
        }
    }

    /// Queue a sample for appending. Samples outside the admission window
    /// are dropped.
    pub fn append_sample(&self, sample: SampleBuffer, rendered: Option<RenderedImage>) {
        {
            let state = self.inner.state.lock();
            if state.status.rank() < WriterStatus::Recording.rank() {
                tracing::debug!("Writer not ready to record yet, dropping sample");
                return;
            }
            if !state.status.admits_samples() {
                return;
            }
        }

        let limit = self.inner.context.max_pending_samples.max(1);
        if self.inner.pending.fetch_add(1, Ordering::AcqRel) >= limit {
            self.inner.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!("Writing queue is backed up, dropping {} sample", sample.media_type());
            return;
        }

        let inner = self.inner.clone();
        let queued = self.inner.writing.execute(move || {
            inner.write_sample(sample, rendered);
            inner.pending.fetch_sub(1, Ordering::AcqRel);
        });
        if !queued {
            self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Stop accepting samples and finalize the file once queued appends
    /// have committed
    pub fn finish_recording(&self) {
        {
            let mut state = self.inner.state.lock();
            if !matches!(state.status, WriterStatus::Recording) {
                return;
            }
            state.status = WriterStatus::FinishingPart1;
        }

        tracing::info!("Finishing writer {}", self.inner.generation);

        let inner = self.inner.clone();
        if !self.inner.writing.execute(move || inner.finalize()) {
            self.inner.fail(RecorderError::Finish("writing queue is not running".to_string()));
        }
    }

    /// Abandon the recording. The muxer is cancelled on the writing queue
    /// and its partial file removed.
    pub fn cancel_recording(&self) {
        {
            let mut state = self.inner.state.lock();
            if !matches!(state.status, WriterStatus::Recording) {
                return;
            }
            state.status = WriterStatus::Idle;
        }

        tracing::info!("Cancelling writer {}", self.inner.generation);

        let inner = self.inner.clone();
        self.inner.writing.execute(move || {
            let muxer = inner.output.lock().muxer.take();
            if let Some(mut muxer) = muxer {
                muxer.cancel();
            }
            inner.remove_output();
        });
    }

    #[cfg(test)]
    pub(crate) fn flush_writing_queue(&self) {
        self.inner.writing.flush();
    }
}

impl WriterInner {
    fn open_muxer(self: &Arc<Self>) {
        match self.try_open_muxer() {
            Ok(()) => {
                self.transition_from(
                    |status| matches!(status, WriterStatus::PreparingToRecord),
                    WriterStatus::Recording,
                );
            }
            Err(error) => {
                tracing::error!("Writer {} failed to start: {}", self.generation, error);
                self.fail(error);
            }
        }
    }

    fn try_open_muxer(&self) -> RecorderResult<()> {
        // Muxers refuse to overwrite
        self.context.files.remove_if_exists(&self.path)?;

        let (video, audio) = {
            let state = self.state.lock();
            (state.video.clone(), state.audio.clone())
        };

        let mut muxer = self.context.muxers.open(&self.path, self.format)?;
        let mut output = self.output.lock();

        if let Some(track) = video {
            output.video = Some(muxer.add_track(track.format_hint.as_ref(), &track.settings)?);
            if let TrackSettings::Video { compression, .. } = &track.settings {
                let pixel_format = match track.format_hint {
                    Some(FormatDescription::Video { pixel_format, .. }) => pixel_format,
                    _ => PixelFormat::Bgra,
                };
                output.pool = Some(PixelBufferPool::new(
                    compression.width,
                    compression.height,
                    pixel_format,
                    PIXEL_BUFFER_POOL_CAPACITY,
                ));
            }
        }
        if let Some(track) = audio {
            output.audio = Some(muxer.add_track(track.format_hint.as_ref(), &track.settings)?);
        }

        muxer.start()?;
        output.muxer = Some(muxer);
        Ok(())
    }

    fn write_sample(self: &Arc<Self>, sample: SampleBuffer, rendered: Option<RenderedImage>) {
        // The status may have moved on since the sample was queued
        if !self.state.lock().status.admits_samples() {
            return;
        }

        let media_type = sample.media_type();
        let mut progress = None;

        let result = {
            let mut guard = self.output.lock();
            let output = &mut *guard;
            let Some(muxer) = output.muxer.as_mut() else {
                return;
            };

            let session_start = match output.session_start {
                Some(start) => start,
                None if media_type == MediaType::Video => {
                    muxer.start_session(sample.pts);
                    output.session_start = Some(sample.pts);
                    sample.pts
                }
                None => return,
            };

            let track = match media_type {
                MediaType::Video => output.video,
                MediaType::Audio => output.audio,
            };
            let Some(track) = track else {
                return;
            };

            if !muxer.is_ready_for_more_media_data(track) {
                tracing::debug!("{} track not ready, dropping sample", media_type);
                return;
            }

            let result = match (rendered, output.pool.as_mut()) {
                (Some(image), Some(pool)) if media_type == MediaType::Video => {
                    let buffer = pool.render(&image);
                    let result = muxer.append_pixel_buffer(track, &buffer, sample.pts);
                    pool.recycle(buffer);
                    result
                }
                _ => muxer.append(track, &sample),
            };

            if result.is_ok() {
                let last = output.last_timestamp.unwrap_or(session_start);
                output.last_timestamp = Some(last.max(sample.pts));
                progress = output.progress_due(self.context.progress_interval_secs);
            }
            result
        };

        match result {
            Ok(()) => {
                if let Some(seconds) = progress {
                    let writer = WriterCoordinator {
                        inner: self.clone(),
                    };
                    let delegate = self.delegate.clone();
                    self.context
                        .callbacks
                        .execute(move || delegate.writer_did_record(&writer, seconds));
                }
            }
            Err(error) => {
                tracing::error!("Writer {} append failed: {}", self.generation, error);
                self.fail(error);
            }
        }
    }

    fn finalize(self: &Arc<Self>) {
        // An append may have failed the writer while this job was queued
        if !self.transition_from(
            |status| matches!(status, WriterStatus::FinishingPart1),
            WriterStatus::FinishingPart2,
        ) {
            return;
        }

        let result = match self.output.lock().muxer.as_mut() {
            Some(muxer) => muxer.finish(),
            None => Err(RecorderError::Finish("muxer already released".to_string())),
        };

        match result {
            Ok(()) => {
                self.transition_from(
                    |status| matches!(status, WriterStatus::FinishingPart2),
                    WriterStatus::Finished,
                );
            }
            Err(error) => {
                tracing::error!("Writer {} failed to finish: {}", self.generation, error);
                self.fail(error);
            }
        }
    }

    fn fail(self: &Arc<Self>, error: RecorderError) {
        self.transition_from(
            |status| !status.is_terminal(),
            WriterStatus::Failed(Arc::new(error)),
        );
    }

    /// Move to `new` if the current status satisfies `expected`, then
    /// dispatch the transition's effects. Returns whether it moved.
    fn transition_from(
        self: &Arc<Self>,
        expected: impl FnOnce(&WriterStatus) -> bool,
        new: WriterStatus,
    ) -> bool {
        let effects = {
            let mut state = self.state.lock();
            if !expected(&state.status) {
                return false;
            }
            let old = std::mem::replace(&mut state.status, new);
            transition_effects(&old, &state.status)
        };

        if !effects.is_empty() {
            let inner = self.clone();
            self.context
                .callbacks
                .execute(move || inner.perform(effects));
        }
        true
    }

    fn perform(self: &Arc<Self>, effects: Vec<WriterEffect>) {
        let writer = WriterCoordinator {
            inner: self.clone(),
        };
        let mut elapsed = 0.0;

        for effect in effects {
            match effect {
                WriterEffect::ReleaseResources => {
                    let mut output = self.output.lock();
                    elapsed = output.elapsed_seconds();
                    output.muxer = None;
                    output.video = None;
                    output.audio = None;
                    output.pool = None;
                }
                WriterEffect::RemoveOutput => self.remove_output(),
                WriterEffect::NotifyPrepared => self.delegate.writer_did_finish_preparing(&writer),
                WriterEffect::NotifyFinished => {
                    tracing::info!(
                        "Writer {} finished {:?} ({:.3}s)",
                        self.generation,
                        self.path,
                        elapsed
                    );
                    self.delegate.writer_did_finish_recording(&writer, elapsed)
                }
                WriterEffect::NotifyFailed(error) => self.delegate.writer_did_fail(&writer, error),
            }
        }
    }

    fn remove_output(&self) {
        if let Err(e) = self.context.files.remove_if_exists(&self.path) {
            tracing::warn!("Failed to remove partial segment {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VideoDimensions;
    use crate::ports::LocalFileSystem;
    use crate::testing::{MuxerStats, StubMuxerFactory, WAIT_TIMEOUT};
    use std::sync::mpsc;

    #[derive(Debug)]
    enum Note {
        Prepared,
        Finished(f64),
        Failed(Arc<RecorderError>),
        Progress(f64),
    }

    struct NoteDelegate {
        tx: Mutex<mpsc::Sender<Note>>,
    }

    impl NoteDelegate {
        fn send(&self, note: Note) {
            let _ = self.tx.lock().send(note);
        }
    }

    impl WriterDelegate for NoteDelegate {
        fn writer_did_finish_preparing(&self, _writer: &WriterCoordinator) {
            self.send(Note::Prepared);
        }

        fn writer_did_finish_recording(&self, _writer: &WriterCoordinator, elapsed_seconds: f64) {
            self.send(Note::Finished(elapsed_seconds));
        }

        fn writer_did_fail(&self, _writer: &WriterCoordinator, error: Arc<RecorderError>) {
            self.send(Note::Failed(error));
        }

        fn writer_did_record(&self, _writer: &WriterCoordinator, elapsed_seconds: f64) {
            self.send(Note::Progress(elapsed_seconds));
        }
    }

    struct Fixture {
        writer: WriterCoordinator,
        notes: mpsc::Receiver<Note>,
        stats: Arc<MuxerStats>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(factory: StubMuxerFactory) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let stats = factory.stats.clone();
            let context = WriterContext {
                muxers: Arc::new(factory),
                files: Arc::new(LocalFileSystem),
                background: Arc::new(SerialQueue::new("test.background").unwrap()),
                callbacks: Arc::new(SerialQueue::new("test.callbacks").unwrap()),
                max_pending_samples: 10_000,
                progress_interval_secs: 0.5,
            };
            let (tx, notes) = mpsc::channel();
            let delegate = Arc::new(NoteDelegate { tx: Mutex::new(tx) });
            let writer = WriterCoordinator::new(
                1,
                dir.path().join("segment.mov"),
                MediaFormat::Mov,
                context,
                delegate,
            )
            .unwrap();

            Self {
                writer,
                notes,
                stats,
                _dir: dir,
            }
        }

        fn add_tracks(&self) {
            self.writer.add_video_track(
                None,
                VideoCompressionSettings::for_dimensions(VideoDimensions::new(64, 36)),
                Transform::IDENTITY,
            );
            self.writer
                .add_audio_track(None, AudioCompressionSettings::default());
        }

        fn prepared(self) -> Self {
            self.add_tracks();
            self.writer.prepare_to_record();
            assert!(matches!(self.next(), Note::Prepared));
            self
        }

        fn next(&self) -> Note {
            self.notes.recv_timeout(WAIT_TIMEOUT).unwrap()
        }

        /// Wait for the final notification, skipping progress
        fn outcome(&self) -> Note {
            loop {
                match self.next() {
                    Note::Progress(_) => continue,
                    note => return note,
                }
            }
        }

        fn appends(&self) -> usize {
            self.writer.flush_writing_queue();
            self.stats.appends.load(Ordering::SeqCst)
        }
    }

    fn video(frame: i64) -> SampleBuffer {
        SampleBuffer::video(
            MediaTime::new(frame, 30),
            MediaTime::new(1, 30),
            4,
            4,
            PixelFormat::Bgra,
            vec![0; 64],
        )
    }

    fn audio(frame: i64) -> SampleBuffer {
        SampleBuffer::audio(MediaTime::new(frame * 1470, 44_100), 44_100, 1, vec![0; 2940])
    }

    #[test]
    fn test_records_and_finishes() {
        let fixture = Fixture::new(StubMuxerFactory::new()).prepared();
        assert!(matches!(fixture.writer.status(), WriterStatus::Recording));

        for frame in 10..=40 {
            fixture.writer.append_sample(video(frame), None);
            fixture.writer.append_sample(audio(frame), None);
        }
        fixture.writer.finish_recording();

        match fixture.outcome() {
            Note::Finished(elapsed) => assert!((elapsed - 1.0).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(fixture.writer.status(), WriterStatus::Finished));
        assert!(fixture.writer.path().exists());
        assert_eq!(fixture.stats.appends.load(Ordering::SeqCst), 62);
        assert_eq!(fixture.stats.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_samples_before_recording_are_dropped() {
        let fixture = Fixture::new(StubMuxerFactory::new());
        fixture.add_tracks();
        fixture.writer.append_sample(video(0), None);
        fixture.writer.prepare_to_record();
        assert!(matches!(fixture.next(), Note::Prepared));
        assert_eq!(fixture.appends(), 0);
    }

    #[test]
    fn test_audio_waits_for_first_video() {
        let fixture = Fixture::new(StubMuxerFactory::new()).prepared();
        fixture.writer.append_sample(audio(0), None);
        assert_eq!(fixture.appends(), 0);

        fixture.writer.append_sample(video(1), None);
        fixture.writer.append_sample(audio(1), None);
        assert_eq!(fixture.appends(), 2);
    }

    #[test]
    fn test_tracks_are_fixed_once_preparing() {
        let fixture = Fixture::new(StubMuxerFactory::new());
        fixture.writer.prepare_to_record();
        fixture.add_tracks();
        assert!(matches!(fixture.next(), Note::Prepared));

        fixture.writer.append_sample(video(0), None);
        assert_eq!(fixture.appends(), 0);

        fixture.writer.finish_recording();
        match fixture.outcome() {
            Note::Failed(error) => assert_eq!(error.code(), "NO_MEDIA_DATA"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_start_failure_fails_writer() {
        let fixture = Fixture::new(StubMuxerFactory {
            fail_start: true,
            ..Default::default()
        });
        fixture.add_tracks();
        fixture.writer.prepare_to_record();

        match fixture.next() {
            Note::Failed(error) => assert_eq!(error.code(), "MUXER_START_ERROR"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(fixture.writer.status().is_terminal());
    }

    #[test]
    fn test_append_failure_fails_writer() {
        let fixture = Fixture::new(StubMuxerFactory {
            fail_append_after: Some(2),
            ..Default::default()
        })
        .prepared();

        for frame in 0..5 {
            fixture.writer.append_sample(video(frame), None);
        }

        match fixture.outcome() {
            Note::Failed(error) => assert_eq!(error.code(), "APPEND_FAILURE"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(fixture.writer.status(), WriterStatus::Failed(_)));
        assert_eq!(fixture.appends(), 2);
        assert!(!fixture.writer.path().exists());
        assert_eq!(fixture.stats.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_releases_muxer() {
        let fixture = Fixture::new(StubMuxerFactory::new()).prepared();
        fixture.writer.append_sample(video(0), None);
        fixture.writer.cancel_recording();
        assert!(matches!(fixture.writer.status(), WriterStatus::Idle));

        fixture.writer.flush_writing_queue();
        assert_eq!(fixture.stats.live.load(Ordering::SeqCst), 0);
        assert!(!fixture.writer.path().exists());

        fixture.writer.append_sample(video(1), None);
        assert_eq!(fixture.appends(), 1);
    }

    #[test]
    fn test_finish_and_cancel_need_recording() {
        let fixture = Fixture::new(StubMuxerFactory::new());
        fixture.writer.finish_recording();
        fixture.writer.cancel_recording();
        assert!(matches!(fixture.writer.status(), WriterStatus::Idle));
        assert_eq!(fixture.stats.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_progress_is_throttled() {
        let fixture = Fixture::new(StubMuxerFactory::new()).prepared();
        for frame in 0..=30 {
            fixture.writer.append_sample(video(frame), None);
        }
        fixture.writer.finish_recording();

        let mut progress = Vec::new();
        loop {
            match fixture.next() {
                Note::Progress(seconds) => progress.push(seconds),
                Note::Finished(_) => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(progress, vec![0.0, 0.5, 1.0]);
    }
}
