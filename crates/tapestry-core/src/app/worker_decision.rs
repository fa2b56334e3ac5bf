//! Worker decision engine.
//!
//! Looks at every worker owned by a composition and returns a single verdict:
//! delete one worker, wait for one, or allow a new one to be created. Pure
//! function over its inputs; reporting and the actual deletion are done by
//! the controller.

use chrono::{DateTime, Utc};

use std::time::Duration;

use crate::domain::{Composition, DeleteReason, Synthesizer, Worker, WorkerDecision};

/// Shortest re-check delay handed out for a running worker.
const MIN_RECHECK: Duration = Duration::from_secs(1);

/// Decide what to do about `workers`.
///
/// Rules, per worker, first decisive one wins:
/// 1. composition deleting: delete it (`CompositionDeleted`)
/// 2. worker terminating: skip the first one so a replacement can be created
///    during teardown; a second one blocks creation (`Exists`)
/// 3. built from another composition/synthesizer revision: `Superseded`
/// 4. current record synthesized: `Success`
/// 5. older than the pod timeout: `Timeout`
/// 6. otherwise still running: `Exists` until the timeout would expire
pub fn decide_worker(
    composition: &Composition,
    synthesizer: &Synthesizer,
    workers: &[Worker],
    now: DateTime<Utc>,
) -> WorkerDecision {
    let timeout = synthesizer.pod_timeout();
    let delete = |worker: &Worker, reason| WorkerDecision::Delete {
        worker: worker.key(),
        reason,
    };

    let mut one_terminating = false;
    for worker in workers {
        if composition.is_deleting() {
            return delete(worker, DeleteReason::CompositionDeleted);
        }

        if worker.is_terminating() {
            if one_terminating {
                return WorkerDecision::Exists {
                    recheck_after: timeout,
                };
            }
            one_terminating = true;
            continue;
        }

        if !worker.is_derived_from(composition, synthesizer) {
            return delete(worker, DeleteReason::Superseded);
        }

        if composition.is_synthesized() {
            return delete(worker, DeleteReason::Success);
        }

        let age = worker.age(now);
        if age > timeout {
            return delete(worker, DeleteReason::Timeout);
        }

        // Still running. No need to look at the rest. Never zero: a zero delay
        // reads as "no requeue".
        return WorkerDecision::Exists {
            recheck_after: (timeout - age).max(MIN_RECHECK),
        };
    }

    WorkerDecision::None
}
