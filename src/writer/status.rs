//! Writer status machine
//!
//! Lifecycle of a single segment writer and the side effects each
//! transition triggers.

use crate::utils::error::RecorderError;
use std::fmt;
use std::sync::Arc;

/// Status of a segment writer
///
/// Statuses are totally ordered by [`rank`](WriterStatus::rank), which
/// grows as the writer progresses. Sample admission is decided by rank.
#[derive(Debug, Clone, Default)]
pub enum WriterStatus {
    #[default]
    Idle,
    PreparingToRecord,
    Recording,
    /// Finishing requested; queued appends still commit
    FinishingPart1,
    /// Finalizing on the writing queue; no append may run
    FinishingPart2,
    Finished,
    Failed(Arc<RecorderError>),
}

impl WriterStatus {
    /// Progress rank. Ranks are spaced so new statuses can slot in.
    pub fn rank(&self) -> u32 {
        match self {
            WriterStatus::Idle => 10_000,
            WriterStatus::PreparingToRecord => 20_000,
            WriterStatus::Recording => 30_000,
            WriterStatus::FinishingPart1 => 40_000,
            WriterStatus::FinishingPart2 => 50_000,
            WriterStatus::Finished => 60_000,
            WriterStatus::Failed(_) => 70_000,
        }
    }

    /// Whether a sample may reach the muxer in this status
    pub fn admits_samples(&self) -> bool {
        let rank = self.rank();
        rank >= WriterStatus::Recording.rank() && rank <= WriterStatus::FinishingPart1.rank()
    }

    /// Whether the writer still owns a live muxing session
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            WriterStatus::Idle | WriterStatus::Finished | WriterStatus::Failed(_)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WriterStatus::Finished | WriterStatus::Failed(_))
    }

    pub fn same_kind(&self, other: &WriterStatus) -> bool {
        self.rank() == other.rank()
    }
}

impl fmt::Display for WriterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterStatus::Idle => write!(f, "idle"),
            WriterStatus::PreparingToRecord => write!(f, "preparing"),
            WriterStatus::Recording => write!(f, "recording"),
            WriterStatus::FinishingPart1 => write!(f, "finishing (part 1)"),
            WriterStatus::FinishingPart2 => write!(f, "finishing (part 2)"),
            WriterStatus::Finished => write!(f, "finished"),
            WriterStatus::Failed(error) => write!(f, "failed: {}", error),
        }
    }
}

/// Side effect of a status transition, run after the status lock is released
#[derive(Debug, Clone)]
pub enum WriterEffect {
    /// Drop the muxer and track handles
    ReleaseResources,
    /// Delete the partial output file
    RemoveOutput,
    NotifyPrepared,
    NotifyFinished,
    NotifyFailed(Arc<RecorderError>),
}

/// Effects of moving from `old` to `new`. Re-entering the same status
/// has no effects.
pub fn transition_effects(old: &WriterStatus, new: &WriterStatus) -> Vec<WriterEffect> {
    if old.same_kind(new) {
        return Vec::new();
    }

    match new {
        WriterStatus::Failed(error) => vec![
            WriterEffect::ReleaseResources,
            WriterEffect::RemoveOutput,
            WriterEffect::NotifyFailed(error.clone()),
        ],
        WriterStatus::Finished => vec![WriterEffect::ReleaseResources, WriterEffect::NotifyFinished],
        WriterStatus::Recording => vec![WriterEffect::NotifyPrepared],
        _ => Vec::new(),
    }
}
