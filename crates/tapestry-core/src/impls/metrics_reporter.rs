//! MetricsReporter - `metrics` crate へのブリッジ
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `tapestry_syntheses_total` | Counter | `composition_namespace` |
//! | `tapestry_synthesis_pod_recreations_total` | Counter | `composition_namespace` |
//! | `tapestry_synthesis_latency_ms` | Histogram | `composition_namespace` |
//!
//! エクスポートは recorder をインストールする側（バイナリ）の責務。

use std::time::Duration;

use metrics::{counter, histogram};

use crate::domain::ObjectKey;
use crate::ports::SynthesisReporter;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: workers created for a synthesis attempt.
    pub const SYNTHESES_TOTAL: &str = "tapestry_syntheses_total";
    /// Counter: workers recreated because they hit the pod timeout.
    pub const POD_RECREATIONS_TOTAL: &str = "tapestry_synthesis_pod_recreations_total";
    /// Histogram: worker creation to successful synthesis, in milliseconds.
    pub const SYNTHESIS_LATENCY_MS: &str = "tapestry_synthesis_latency_ms";
}

/// Label keys.
pub mod labels {
    pub const COMPOSITION_NAMESPACE: &str = "composition_namespace";
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsReporter;

impl MetricsReporter {
    pub fn new() -> Self {
        Self
    }
}

impl SynthesisReporter for MetricsReporter {
    fn synthesis_started(&self, composition: &ObjectKey) {
        counter!(
            names::SYNTHESES_TOTAL,
            labels::COMPOSITION_NAMESPACE => composition.namespace.clone(),
        )
        .increment(1);
    }

    fn worker_timed_out(&self, composition: &ObjectKey) {
        counter!(
            names::POD_RECREATIONS_TOTAL,
            labels::COMPOSITION_NAMESPACE => composition.namespace.clone(),
        )
        .increment(1);
    }

    fn synthesis_latency(&self, composition: &ObjectKey, latency: Duration) {
        histogram!(
            names::SYNTHESIS_LATENCY_MS,
            labels::COMPOSITION_NAMESPACE => composition.namespace.clone(),
        )
        .record(latency.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporting_without_recorder_is_a_noop() {
        let reporter = MetricsReporter::new();
        let key = ObjectKey::new("ns", "web");
        reporter.synthesis_started(&key);
        reporter.worker_timed_out(&key);
        reporter.synthesis_latency(&key, Duration::from_millis(10));
    }
}
