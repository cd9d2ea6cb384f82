//! Property-based tests for dispatch bookkeeping
//!
//! These tests verify the stats invariant under arbitrary outcome sequences and
//! the bounds of the progress formulas.

use bulksend_core::{DispatchSettings, DispatchStats, JobStatus, ProgressSnapshot, SettingsLimits};
use proptest::prelude::*;

/// Outcome applied to the stats: success, failure, or requeue of all failures
#[derive(Debug, Clone, Copy)]
enum Step {
    Success,
    Failure,
    Requeue,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => Just(Step::Success),
        3 => Just(Step::Failure),
        1 => Just(Step::Requeue),
    ]
}

proptest! {
    /// Property: sent + failed + remaining == total after every mutation
    #[test]
    fn stats_invariant_holds(total in 0usize..200, steps in prop::collection::vec(arb_step(), 0..400)) {
        let mut stats = DispatchStats::new(total);

        for step in steps {
            match step {
                Step::Success if stats.remaining > 0 => stats.record_success(),
                Step::Failure if stats.remaining > 0 => stats.record_failure(),
                Step::Requeue => stats.requeue_failed(stats.failed),
                _ => {}
            }
            prop_assert!(stats.is_consistent());
        }
    }

    /// Property: progress percentages stay within [0, 100] and batches within range
    #[test]
    fn progress_is_bounded(
        total in 0usize..500,
        position_seed in 0usize..600,
        batch_size in 1usize..250,
        sent_seed in 0usize..500,
    ) {
        let done = position_seed.min(total);
        let sent = sent_seed.min(done);
        let stats = DispatchStats {
            total,
            sent,
            failed: done - sent,
            remaining: total - done,
        };

        // Positions past the end of the list are clamped
        let snapshot = ProgressSnapshot::compute(&stats, position_seed, batch_size, JobStatus::Processing);

        prop_assert!((0.0..=100.0).contains(&snapshot.overall_progress));
        prop_assert!((0.0..=100.0).contains(&snapshot.batch_progress));
        prop_assert!(snapshot.current_batch <= snapshot.total_batches);
        prop_assert_eq!(snapshot.total_batches, total.div_ceil(batch_size));
        if total > 0 {
            prop_assert!(snapshot.current_batch >= 1);
        }
    }

    /// Property: batch_size 0 and negative intervals are rejected under any limits
    #[test]
    fn structural_violations_always_rejected(pdf in -1000.0f64..-0.001, batch in 0.0f64..100.0) {
        for limits in [SettingsLimits::default(), SettingsLimits::unbounded()] {
            prop_assert!(DispatchSettings::new(0, 5.0, 10.0).validate_against(&limits).is_err());
            prop_assert!(DispatchSettings::new(1, pdf, batch).validate_against(&limits).is_err());
        }
    }
}
