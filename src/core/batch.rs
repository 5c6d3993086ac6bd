use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::types::{EviError, EviResult};

/// Batch-level cancellation shared between the caller and running stages.
///
/// Individual pixel computations are never interrupted; a stage checks the
/// flag before each pixel and abandons the remaining ones.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> EviResult<()> {
        if self.is_cancelled() {
            Err(EviError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of one pixel in a batch stage
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PixelOutcome<T> {
    Computed(T),
    /// A statistic was undefined for the pixel
    Insufficient,
    /// The pixel's input was unusable (`UpstreamData`)
    Failed,
}

impl<T> PixelOutcome<T> {
    /// Classify a per-pixel result. Cancellation is not a pixel outcome
    /// and is passed through.
    pub(crate) fn classify(result: EviResult<T>, on_failure: impl FnOnce(&EviError)) -> EviResult<Self> {
        match result {
            Ok(value) => Ok(PixelOutcome::Computed(value)),
            Err(EviError::InsufficientData { .. }) => Ok(PixelOutcome::Insufficient),
            Err(EviError::Cancelled) => Err(EviError::Cancelled),
            Err(e) => {
                on_failure(&e);
                Ok(PixelOutcome::Failed)
            }
        }
    }

    pub(crate) fn into_option(self) -> Option<T> {
        match self {
            PixelOutcome::Computed(value) => Some(value),
            _ => None,
        }
    }
}

/// Outcome counters for one per-pixel batch stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub pixels: usize,
    pub computed: usize,
    /// Pixels reported as no data because a statistic was undefined
    pub insufficient: usize,
    /// Pixels reported as no data because their input was malformed
    pub upstream_errors: usize,
}

impl StageStats {
    pub(crate) fn from_outcomes<T>(outcomes: &[PixelOutcome<T>]) -> Self {
        let mut stats = Self { pixels: outcomes.len(), ..Self::default() };
        for outcome in outcomes {
            match outcome {
                PixelOutcome::Computed(_) => stats.computed += 1,
                PixelOutcome::Insufficient => stats.insufficient += 1,
                PixelOutcome::Failed => stats.upstream_errors += 1,
            }
        }
        stats
    }
}
