//! Shared utilities

pub mod error;
pub mod queue;

pub use error::{ErrorResponse, RecorderError, RecorderResult};
pub use queue::SerialQueue;
