//! Segment Recorder - pausable video capture recording, merged into one file.
//!
//! A recording is written as one segment file per start/resume; stopping
//! merges the segments into the destination, cut back to back or joined
//! with cross-fades. Capture sources push samples into a
//! [`RecordingCoordinator`]; encoding, export and probing go through the
//! traits in [`ports`], with FFmpeg implementations included.

pub mod export;
pub mod media;
pub mod ports;
pub mod recorder;
pub mod settings;
pub mod utils;
pub mod writer;

#[cfg(test)]
mod testing;

pub use media::{Attributes, DeviceOrientation, MediaFormat, Segment, VideoDimensions};
pub use recorder::{
    EventForwarder, RecorderPorts, RecordingCoordinator, RecordingDelegate, RecordingEvent,
    RecordingOutcome, RecordingStatus, SessionOptions,
};
pub use settings::RecorderSettings;
pub use utils::error::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a tracing subscriber honouring `RUST_LOG`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segment_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Segment Recorder v{}", env!("CARGO_PKG_VERSION"));
    }
}
