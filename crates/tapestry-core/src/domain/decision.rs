//! Decision model: what to do about the workers of one Composition.
//!
//! This module only defines the shape of a verdict. The rules producing it
//! live in `app::worker_decision`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::meta::ObjectKey;

/// Why a worker is being deleted.
///
/// Used both in the controller's action result and as the structured `reason`
/// field in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeleteReason {
    /// The owning Composition is being deleted.
    CompositionDeleted,

    /// Built from a Composition/Synthesizer pair no longer in effect.
    Superseded,

    /// Synthesis for the current generation is done.
    Success,

    /// Ran longer than the Synthesizer's pod timeout.
    Timeout,
}

impl DeleteReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeleteReason::CompositionDeleted => "CompositionDeleted",
            DeleteReason::Superseded => "Superseded",
            DeleteReason::Success => "Success",
            DeleteReason::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of the worker decision engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerDecision {
    /// Delete exactly this worker.
    Delete {
        worker: ObjectKey,
        reason: DeleteReason,
    },

    /// A worker is still doing useful work (or too many are terminating).
    /// Check again after the delay.
    Exists { recheck_after: Duration },

    /// Nothing blocks creating a new worker.
    None,
}
