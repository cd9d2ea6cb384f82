//! Progress math
//!
//! A `ProgressSnapshot` is derived on demand from the job's stats and its position
//! in the contact list. Batches are contiguous slices of `batch_size` contacts of
//! that list; the last batch may be shorter. Retries revisit earlier positions
//! and never add batches.

use serde::{Deserialize, Serialize};

use crate::types::{DispatchStats, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Percentage of contacts with a final outcome
    pub overall_progress: f64,
    /// Percentage of the current batch already attempted
    pub batch_progress: f64,
    /// 1-based; 0 when there is nothing to send
    pub current_batch: usize,
    pub total_batches: usize,
    pub stats: DispatchStats,
    pub job_status: JobStatus,
}

impl ProgressSnapshot {
    /// Compute a snapshot
    ///
    /// `position` is the list index of the next contact to finish; it equals
    /// `stats.total` once nothing is left.
    pub fn compute(
        stats: &DispatchStats,
        position: usize,
        batch_size: usize,
        job_status: JobStatus,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let total = stats.total;
        let cursor = position.min(total);

        let overall_progress = percentage(stats.processed(), total);

        let total_batches = total.div_ceil(batch_size);
        let (current_batch, batch_progress) = if total_batches == 0 {
            (0, 0.0)
        } else {
            let current_batch = total_batches.min(cursor / batch_size + 1);
            let batch_start = (current_batch - 1) * batch_size;
            let batch_len = batch_size.min(total - batch_start);
            let done_in_batch = cursor - batch_start;
            (current_batch, percentage(done_in_batch, batch_len))
        };

        Self {
            overall_progress,
            batch_progress,
            current_batch,
            total_batches,
            stats: *stats,
            job_status,
        }
    }

    /// Snapshot reported when no job exists
    pub fn idle() -> Self {
        Self::default()
    }

    /// The job has no further work that a poller should wait for
    pub fn is_settled(&self) -> bool {
        matches!(self.job_status, JobStatus::Completed | JobStatus::Idle)
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}
