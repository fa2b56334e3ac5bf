//! Worker ("pod"): the ephemeral process that performs one synthesis attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::composition::Composition;
use super::meta::{ObjectKey, ObjectMeta};
use super::synthesizer::Synthesizer;

/// The (Composition, Synthesizer) pair a worker was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOrigin {
    pub composition_generation: u64,
    pub synthesizer_name: String,
    pub synthesizer_generation: u64,
}

impl WorkerOrigin {
    pub fn of(composition: &Composition, synthesizer: &Synthesizer) -> Self {
        Self {
            composition_generation: composition.generation(),
            synthesizer_name: synthesizer.metadata.name.clone(),
            synthesizer_generation: synthesizer.metadata.generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub metadata: ObjectMeta,

    /// Name of the owning Composition (same namespace).
    pub owner: String,

    pub origin: WorkerOrigin,
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl Worker {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn owner_key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.owner.clone())
    }

    /// Deletion has been requested but the store has not removed it yet.
    pub fn is_terminating(&self) -> bool {
        self.metadata.is_deleting()
    }

    /// Whether this worker was built from exactly the pair presently in effect.
    pub fn is_derived_from(&self, composition: &Composition, synthesizer: &Synthesizer) -> bool {
        self.origin == WorkerOrigin::of(composition, synthesizer)
    }

    /// Time since creation. Missing or future timestamps count as zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        self.metadata
            .creation_timestamp
            .and_then(|created| now.signed_duration_since(created).to_std().ok())
            .unwrap_or_default()
    }
}
