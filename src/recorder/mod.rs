//! Recording session module
//!
//! This module sequences segment writers into one recording:
//! - `state` defines the session state machine and its notifications
//! - `coordinator` drives writers through start, pause, resume and stop
//! - `delegate` delivers notifications, optionally as broadcast events
//! - `ingest` caches sample formats and skips the first sample after a change

pub mod coordinator;
pub mod delegate;
pub mod ingest;
pub mod state;

pub use coordinator::{RecorderPorts, RecordingCoordinator, SessionOptions};
pub use delegate::{EventForwarder, RecordingDelegate};
pub use ingest::FormatCache;
pub use state::{
    transition_effects, RecordingEvent, RecordingOutcome, RecordingStatus, SessionEffect,
};
