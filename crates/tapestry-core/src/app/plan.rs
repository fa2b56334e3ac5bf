//! Pass planning: (persisted state) -> the single next step.
//!
//! Phase order is part of the contract:
//! 1. finalizer attach (`finalization::needs_finalizer`, checked by the
//!    controller before workers and synthesizer are fetched)
//! 2. worker decision
//! 3. deletion sequencing
//! 4. status swap
//! 5. worker creation
//!
//! A phase that produces a mutation ends the pass. The next pass, triggered by
//! that mutation, picks up where this one stopped.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::creation::should_create;
use super::finalization::{self, FinalizationStep};
use super::status::needs_swap;
use super::worker_decision::decide_worker;
use crate::domain::{Composition, DeleteReason, ObjectKey, Synthesizer, Worker, WorkerDecision};

/// Everything a pass reads from the store.
#[derive(Debug, Clone, Copy)]
pub struct PassInput<'a> {
    pub composition: &'a Composition,
    pub synthesizer: &'a Synthesizer,
    pub workers: &'a [Worker],
}

/// The one thing a pass does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    DeleteWorker {
        worker: ObjectKey,
        reason: DeleteReason,
    },
    AwaitWorker {
        recheck_after: Duration,
    },
    Finalize(FinalizationStep),
    SwapStatus,
    CreateWorker,
    Converged,
}

/// Phases 2 to 5.
pub fn plan(input: &PassInput<'_>, now: DateTime<Utc>) -> Step {
    let composition = input.composition;

    if composition.is_deleting() {
        return plan_deletion(composition, input.workers);
    }

    match decide_worker(composition, input.synthesizer, input.workers, now) {
        WorkerDecision::Delete { worker, reason } => {
            return Step::DeleteWorker { worker, reason };
        }
        WorkerDecision::Exists { recheck_after } => return Step::AwaitWorker { recheck_after },
        WorkerDecision::None => {}
    }

    if needs_swap(composition) {
        return Step::SwapStatus;
    }

    if should_create(composition) {
        return Step::CreateWorker;
    }

    Step::Converged
}

/// Phases 2 and 3 for a composition being deleted.
///
/// Every worker goes regardless of what it was built from, so the synthesizer
/// is not needed and may already be gone.
pub fn plan_deletion(composition: &Composition, workers: &[Worker]) -> Step {
    if let Some(worker) = workers.first() {
        return Step::DeleteWorker {
            worker: worker.key(),
            reason: DeleteReason::CompositionDeleted,
        };
    }

    match finalization::next_step(composition, workers) {
        FinalizationStep::Released => Step::Converged,
        step => Step::Finalize(step),
    }
}
