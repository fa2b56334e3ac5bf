//! Synthesizer: how a worker is built and how long it may run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::meta::{ObjectKey, ObjectMeta};

/// Applied by [`Synthesizer::new`] when no explicit timeout is given.
pub const DEFAULT_POD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizerSpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Maximum time a worker may run before it is considered stuck.
    pub pod_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesizer {
    pub metadata: ObjectMeta,
    pub spec: SynthesizerSpec,
}

impl Synthesizer {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        let mut metadata = ObjectMeta::new("", name);
        metadata.generation = 1;
        Self {
            metadata,
            spec: SynthesizerSpec {
                image: image.into(),
                command: Vec::new(),
                pod_timeout: DEFAULT_POD_TIMEOUT,
            },
        }
    }

    pub fn with_pod_timeout(mut self, pod_timeout: Duration) -> Self {
        self.spec.pod_timeout = pod_timeout;
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.spec.command = command;
        self
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn pod_timeout(&self) -> Duration {
        self.spec.pod_timeout
    }
}
