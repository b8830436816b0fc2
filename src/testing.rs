//! In-memory collaborators for tests
//!
//! The stub muxer writes a small JSON "container" describing what was
//! appended; the stub probe and transcoder read and write the same format.

use crate::export::Composition;
use crate::media::{
    FormatDescription, MediaFormat, MediaTime, MediaType, PixelBuffer, SampleBuffer, Segment,
    Size, TimeRange, Transform,
};
use crate::ports::{
    AssetInfo, AudioTrackInfo, ExportCompletion, ExportRequest, ExportStatus, MediaProbe, Muxer,
    MuxerFactory, TrackHandle, TrackSettings, Transcoder, VideoTrackInfo,
};
use crate::recorder::{RecordingDelegate, RecordingEvent, RecordingOutcome};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct Container {
    duration: f64,
    width: f64,
    height: f64,
    quarter_turns: u8,
    has_audio: bool,
}

/// Write a stub container of `seconds` at `path`
pub fn write_container(path: &Path, seconds: f64, with_audio: bool) {
    write_container_with(path, seconds, Size::new(1920.0, 1080.0), 0, with_audio).unwrap();
}

fn write_container_with(
    path: &Path,
    seconds: f64,
    size: Size,
    quarter_turns: u8,
    has_audio: bool,
) -> std::io::Result<()> {
    let container = Container {
        duration: seconds,
        width: size.width,
        height: size.height,
        quarter_turns,
        has_audio,
    };
    std::fs::write(path, serde_json::to_vec(&container)?)
}

/// Poll `condition` until it holds or the wait times out
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Counters shared by every muxer a factory opens
#[derive(Debug, Default)]
pub struct MuxerStats {
    pub opened: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub appends: AtomicUsize,
    pub pixel_buffer_appends: AtomicUsize,
}

#[derive(Default)]
pub struct StubMuxerFactory {
    pub stats: Arc<MuxerStats>,
    /// Fail the append after this many successful appends
    pub fail_append_after: Option<usize>,
    pub fail_start: bool,
}

impl StubMuxerFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MuxerFactory for StubMuxerFactory {
    fn open(&self, path: &Path, _format: MediaFormat) -> RecorderResult<Box<dyn Muxer>> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(StubMuxer {
            path: path.to_path_buf(),
            stats: self.stats.clone(),
            fail_append_after: self.fail_append_after,
            fail_start: self.fail_start,
            tracks: Vec::new(),
            started: false,
            session_start: None,
            last_video: None,
            has_audio: false,
            appends: 0,
        }))
    }
}

pub struct StubMuxer {
    path: PathBuf,
    stats: Arc<MuxerStats>,
    fail_append_after: Option<usize>,
    fail_start: bool,
    tracks: Vec<TrackSettings>,
    started: bool,
    session_start: Option<MediaTime>,
    last_video: Option<MediaTime>,
    has_audio: bool,
    appends: usize,
}

impl StubMuxer {
    fn record(&mut self, track: TrackHandle, pts: MediaTime) -> RecorderResult<()> {
        let media_type = self
            .tracks
            .get(track.0)
            .map(TrackSettings::media_type)
            .ok_or_else(|| RecorderError::AppendFailure {
                media_type: MediaType::Video,
                reason: "unknown track".to_string(),
            })?;

        if self.fail_append_after.is_some_and(|limit| self.appends >= limit) {
            return Err(RecorderError::AppendFailure {
                media_type,
                reason: "injected failure".to_string(),
            });
        }

        self.appends += 1;
        self.stats.appends.fetch_add(1, Ordering::SeqCst);
        match media_type {
            MediaType::Video => {
                self.last_video = Some(self.last_video.map_or(pts, |last| last.max(pts)));
            }
            MediaType::Audio => self.has_audio = true,
        }
        Ok(())
    }
}

impl Muxer for StubMuxer {
    fn add_track(
        &mut self,
        _format_hint: Option<&FormatDescription>,
        settings: &TrackSettings,
    ) -> RecorderResult<TrackHandle> {
        self.tracks.push(settings.clone());
        Ok(TrackHandle(self.tracks.len() - 1))
    }

    fn start(&mut self) -> RecorderResult<()> {
        if self.fail_start {
            return Err(RecorderError::MuxerStart("injected failure".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.session_start = Some(at);
    }

    fn is_ready_for_more_media_data(&self, _track: TrackHandle) -> bool {
        true
    }

    fn append(&mut self, track: TrackHandle, sample: &SampleBuffer) -> RecorderResult<()> {
        self.record(track, sample.pts)
    }

    fn append_pixel_buffer(
        &mut self,
        track: TrackHandle,
        _buffer: &PixelBuffer,
        pts: MediaTime,
    ) -> RecorderResult<()> {
        self.record(track, pts)?;
        self.stats.pixel_buffer_appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&mut self) -> RecorderResult<()> {
        if !self.started {
            return Err(RecorderError::Finish("never started".to_string()));
        }
        let (Some(start), Some(last)) = (self.session_start, self.last_video) else {
            return Err(RecorderError::NoMediaData("no video was appended".to_string()));
        };

        let (size, transform) = self
            .tracks
            .iter()
            .find_map(|t| match t {
                TrackSettings::Video {
                    compression,
                    transform,
                } => Some((
                    Size::new(compression.width as f64, compression.height as f64),
                    *transform,
                )),
                TrackSettings::Audio(_) => None,
            })
            .unwrap_or((Size::new(0.0, 0.0), Transform::IDENTITY));

        write_container_with(
            &self.path,
            (last - start).seconds(),
            size,
            transform.quarter_turns(),
            self.has_audio,
        )?;
        Ok(())
    }

    fn cancel(&mut self) {
        self.started = false;
    }
}

impl Drop for StubMuxer {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reads stub containers
pub struct StubProbe;

impl MediaProbe for StubProbe {
    fn probe(&self, path: &Path) -> RecorderResult<AssetInfo> {
        let container: Container = serde_json::from_slice(&std::fs::read(path)?)?;
        let duration = MediaTime::from_seconds(container.duration, 600);
        let range = TimeRange::new(MediaTime::ZERO, duration);
        let preferred_transform = match container.quarter_turns {
            0 => Transform::IDENTITY,
            turns => Transform::rotation(turns as f64 * std::f64::consts::FRAC_PI_2),
        };

        Ok(AssetInfo {
            path: path.to_path_buf(),
            duration,
            video: Some(VideoTrackInfo {
                natural_size: Size::new(container.width, container.height),
                preferred_transform,
                time_range: range,
            }),
            audio: container
                .has_audio
                .then_some(AudioTrackInfo { time_range: range }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderBehavior {
    Complete,
    Fail,
    Cancel,
}

/// Writes a container as long as the composition
pub struct StubTranscoder {
    behavior: TranscoderBehavior,
    exports: AtomicUsize,
    last_had_video_composition: AtomicBool,
}

impl StubTranscoder {
    pub fn new(behavior: TranscoderBehavior) -> Self {
        Self {
            behavior,
            exports: AtomicUsize::new(0),
            last_had_video_composition: AtomicBool::new(false),
        }
    }

    pub fn export_count(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    pub fn last_request_had_video_composition(&self) -> bool {
        self.last_had_video_composition.load(Ordering::SeqCst)
    }
}

fn has_audio(composition: &Composition) -> bool {
    composition
        .tracks_of(MediaType::Audio)
        .any(|t| !t.segments.is_empty())
}

impl Transcoder for StubTranscoder {
    fn export(&self, request: ExportRequest, completion: ExportCompletion) -> RecorderResult<()> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        self.last_had_video_composition
            .store(request.video_composition.is_some(), Ordering::SeqCst);

        let behavior = self.behavior;
        std::thread::spawn(move || {
            let status = match behavior {
                TranscoderBehavior::Complete => {
                    let size = request
                        .video_composition
                        .as_ref()
                        .map(|v| v.render_size)
                        .or_else(|| request.composition.natural_size())
                        .unwrap_or_default();
                    match write_container_with(
                        &request.output,
                        request.composition.duration().seconds(),
                        size,
                        0,
                        has_audio(&request.composition),
                    ) {
                        Ok(()) => ExportStatus::Completed,
                        Err(e) => ExportStatus::Failed(RecorderError::Io(e)),
                    }
                }
                TranscoderBehavior::Fail => ExportStatus::Failed(RecorderError::ExportSession(
                    "injected failure".to_string(),
                )),
                TranscoderBehavior::Cancel => ExportStatus::Cancelled,
            };
            completion(status);
        });
        Ok(())
    }
}

/// Delegate that sends every notification over a channel
pub struct ChannelDelegate {
    tx: Mutex<mpsc::Sender<RecordingEvent>>,
}

impl ChannelDelegate {
    pub fn new() -> (Arc<Self>, EventLog) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self { tx: Mutex::new(tx) }),
            EventLog {
                rx,
                seen: Vec::new(),
            },
        )
    }

    fn send(&self, event: RecordingEvent) {
        let _ = self.tx.lock().send(event);
    }
}

impl RecordingDelegate for ChannelDelegate {
    fn will_begin_recording(&self) {
        self.send(RecordingEvent::WillBegin);
    }

    fn did_begin_recording(&self) {
        self.send(RecordingEvent::DidBegin);
    }

    fn did_record(&self, seconds: f64) {
        self.send(RecordingEvent::DidRecord(seconds));
    }

    fn will_pause(&self) {
        self.send(RecordingEvent::WillPause);
    }

    fn did_pause(&self, segments: &[Segment]) {
        self.send(RecordingEvent::DidPause(segments.to_vec()));
    }

    fn will_finish_recording(&self) {
        self.send(RecordingEvent::WillFinish);
    }

    fn did_finish_recording(&self, outcome: &RecordingOutcome) {
        self.send(RecordingEvent::DidFinish(outcome.clone()));
    }
}

/// Receiving end of a [`ChannelDelegate`]
pub struct EventLog {
    rx: mpsc::Receiver<RecordingEvent>,
    /// Every event received so far, in order
    pub seen: Vec<RecordingEvent>,
}

impl EventLog {
    /// Wait for the next event matching `predicate`
    pub fn wait_for(&mut self, predicate: impl Fn(&RecordingEvent) -> bool) -> RecordingEvent {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) => {
                    self.seen.push(event.clone());
                    if predicate(&event) {
                        return event;
                    }
                }
                Err(_) => panic!("timed out waiting for event; saw {:?}", self.seen),
            }
        }
    }

    pub fn wait_begin(&mut self) {
        self.wait_for(|e| matches!(e, RecordingEvent::DidBegin));
    }

    pub fn wait_paused(&mut self) -> Vec<Segment> {
        match self.wait_for(|e| matches!(e, RecordingEvent::DidPause(_))) {
            RecordingEvent::DidPause(segments) => segments,
            _ => unreachable!(),
        }
    }

    pub fn wait_finished(&mut self) -> RecordingOutcome {
        match self.wait_for(|e| matches!(e, RecordingEvent::DidFinish(_))) {
            RecordingEvent::DidFinish(outcome) => outcome,
            _ => unreachable!(),
        }
    }

    /// Drain events that arrived without waiting
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.seen.push(event);
        }
    }

    pub fn count(&self, predicate: impl Fn(&RecordingEvent) -> bool) -> usize {
        self.seen.iter().filter(|e| predicate(e)).count()
    }
}

/// Write an executable shell script standing in for a media tool
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
