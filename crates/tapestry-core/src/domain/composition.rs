//! Composition: the desired-state resource that requires periodic synthesis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::meta::{ObjectKey, ObjectMeta};

/// Finalizer that keeps a Composition in the store until its workers are gone
/// and its status bookkeeping has settled.
pub const CLEANUP_FINALIZER: &str = "tapestry.io/cleanup";

/// Reference to the cluster-scoped Synthesizer a Composition is built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizerRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionSpec {
    pub synthesizer: SynthesizerRef,
}

/// Bookkeeping for one synthesis attempt.
///
/// `reconciled` and `ready` are owned by downstream collaborators. This crate
/// only resets them when it forces a record forward during deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRecord {
    pub observed_composition_generation: u64,

    #[serde(default)]
    pub synthesized: bool,

    #[serde(default)]
    pub reconciled: bool,

    #[serde(default)]
    pub ready: bool,

    /// Creation time of the worker that produced this record (latency only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_creation: Option<DateTime<Utc>>,
}

impl SynthesisRecord {
    /// A fresh, unsynthesized record targeting `generation`.
    pub fn for_generation(generation: u64) -> Self {
        Self {
            observed_composition_generation: generation,
            ..Self::default()
        }
    }
}

/// Double-buffered status: the attempt in progress and the last complete one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<SynthesisRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<SynthesisRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    pub metadata: ObjectMeta,
    pub spec: CompositionSpec,

    #[serde(default)]
    pub status: CompositionStatus,
}

impl Composition {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        synthesizer: impl Into<String>,
    ) -> Self {
        let mut metadata = ObjectMeta::new(namespace, name);
        metadata.generation = 1;
        Self {
            metadata,
            spec: CompositionSpec {
                synthesizer: SynthesizerRef {
                    name: synthesizer.into(),
                },
            },
            status: CompositionStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn generation(&self) -> u64 {
        self.metadata.generation
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.is_deleting()
    }

    pub fn synthesizer_key(&self) -> ObjectKey {
        ObjectKey::cluster(self.spec.synthesizer.name.clone())
    }

    /// Whether the current attempt has produced output.
    pub fn is_synthesized(&self) -> bool {
        self.status
            .current_state
            .as_ref()
            .is_some_and(|state| state.synthesized)
    }
}
