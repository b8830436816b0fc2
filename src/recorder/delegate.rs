//! Recording delegate
//!
//! Receives session notifications. All methods are called on the
//! session's callback queue, one at a time, in transition order.

use super::state::{RecordingEvent, RecordingOutcome};
use crate::media::Segment;
use tokio::sync::broadcast;

pub trait RecordingDelegate: Send + Sync {
    fn will_begin_recording(&self);

    fn did_begin_recording(&self);

    /// Elapsed seconds of the segment being recorded
    fn did_record(&self, seconds: f64);

    fn will_pause(&self);

    /// The current segment is finished; `segments` holds every segment
    /// recorded so far
    fn did_pause(&self, segments: &[Segment]);

    fn will_finish_recording(&self);

    fn did_finish_recording(&self, outcome: &RecordingOutcome);
}

/// Delegate that re-broadcasts every notification as a [`RecordingEvent`]
pub struct EventForwarder {
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl EventForwarder {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    fn send(&self, event: RecordingEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

impl Default for EventForwarder {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RecordingDelegate for EventForwarder {
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
