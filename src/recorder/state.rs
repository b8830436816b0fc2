//! Recording state management
//!
//! Defines the session state machine, the notifications its transitions
//! fire, and the outcome a finished session reports.

use crate::media::Segment;
use crate::utils::error::RecorderError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Current state of a recording session
#[derive(Debug, Clone)]
pub enum RecordingStatus {
    /// No recording in progress. Carries the error that ended the last
    /// session, if any.
    Idle { error: Option<Arc<RecorderError>> },
    /// A segment writer is being prepared
    StartingRecording,
    /// Samples are being written to the current segment
    Recording,
    /// Pause requested; the current segment is finishing
    Pause,
    /// Paused between segments
    Pausing,
    /// Stop requested; finishing the last segment or merging
    StoppingRecording,
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self::Idle { error: None }
    }
}

impl RecordingStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, RecordingStatus::Idle { .. })
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingStatus::Recording)
    }

    /// Compare statuses ignoring the error carried by `Idle`
    pub fn same_kind(&self, other: &RecordingStatus) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingStatus::Idle { error: None } => write!(f, "idle"),
            RecordingStatus::Idle { error: Some(error) } => write!(f, "idle (failed: {})", error),
            RecordingStatus::StartingRecording => write!(f, "starting"),
            RecordingStatus::Recording => write!(f, "recording"),
            RecordingStatus::Pause => write!(f, "pausing"),
            RecordingStatus::Pausing => write!(f, "paused"),
            RecordingStatus::StoppingRecording => write!(f, "stopping"),
        }
    }
}

/// Side effect of a session transition, run after the session lock is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    NotifyWillBegin,
    NotifyDidBegin,
    NotifyWillPause,
    NotifyDidPause,
    NotifyWillFinish,
    /// Delete segment files, release the writer, reset the working destination
    Cleanup,
    NotifyDidFinish,
}

/// Effects fired by moving from `old` to `new`.
///
/// Entering `Idle` always cleans up and reports the finish, whatever the
/// previous status.
pub fn transition_effects(old: &RecordingStatus, new: &RecordingStatus) -> Vec<SessionEffect> {
    use RecordingStatus::*;

    if old.same_kind(new) {
        return Vec::new();
    }

    match (old, new) {
        (_, Idle { .. }) => vec![SessionEffect::Cleanup, SessionEffect::NotifyDidFinish],
        (Idle { .. } | Pausing, StartingRecording) => vec![SessionEffect::NotifyWillBegin],
        (StartingRecording, Recording) => vec![SessionEffect::NotifyDidBegin],
        (Recording | Pausing, StoppingRecording) => vec![SessionEffect::NotifyWillFinish],
        (Recording, Pause) => vec![SessionEffect::NotifyWillPause],
        (Pause, Pausing) => vec![SessionEffect::NotifyDidPause],
        _ => Vec::new(),
    }
}

/// How a recording session ended
#[derive(Debug, Clone)]
pub enum RecordingOutcome {
    /// The destination file was written
    Completed(PathBuf),
    /// Nothing was recorded; no file was written
    Empty,
    /// The session was cancelled; every segment file was discarded
    Cancelled,
    Failed(Arc<RecorderError>),
}

impl RecordingOutcome {
    pub fn destination(&self) -> Option<&Path> {
        match self {
            RecordingOutcome::Completed(path) => Some(path),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Arc<RecorderError>> {
        match self {
            RecordingOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    WillBegin,
    DidBegin,
    /// Elapsed seconds of the current segment
    DidRecord(f64),
    WillPause,
    /// Segments recorded so far
    DidPause(Vec<Segment>),
    WillFinish,
    DidFinish(RecordingOutcome),
}
