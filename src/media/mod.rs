//! Media value types
//!
//! Time, geometry, samples, formats and segments shared by the writer,
//! the recorder and the exporter.

pub mod format;
pub mod geometry;
pub mod sample;
pub mod segment;
pub mod time;

pub use format::*;
pub use geometry::{Size, Transform};
pub use sample::*;
pub use segment::Segment;
pub use time::{MediaTime, TimeRange};
