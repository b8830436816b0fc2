//! Frame source hooks
//!
//! Capture collaborators push samples into
//! [`RecordingCoordinator::ingest_sample`](crate::recorder::RecordingCoordinator::ingest_sample)
//! from their own delivery threads. Before a video frame is encoded, the
//! recorder offers it to an optional `FrameProcessor`.

use crate::media::{RenderedImage, SampleBuffer};

pub trait FrameProcessor: Send + Sync {
    /// Post-process a captured video frame. Returning an image encodes it
    /// in place of the captured frame; `None` keeps the original.
    fn process_video_frame(&self, sample: &SampleBuffer) -> Option<RenderedImage>;
}

impl<F> FrameProcessor for F
where
    F: Fn(&SampleBuffer) -> Option<RenderedImage> + Send + Sync,
{
    fn process_video_frame(&self, sample: &SampleBuffer) -> Option<RenderedImage> {
        self(sample)
    }
}
