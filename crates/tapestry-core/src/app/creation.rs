//! Creation gate: whether a new worker may be created, the shared rate limit
//! on creations, and the worker template.

use std::num::NonZeroU32;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::clock::{Clock as _, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::domain::{Composition, ObjectMeta, Synthesizer, Worker, WorkerOrigin};

/// Slowest replenish period accepted; anything slower is clamped.
const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Token bucket shared by every composition a controller handles.
///
/// Process-local and approximate. A caller that is refused gets the time
/// until the next token and is expected to come back later.
pub struct CreationLimiter {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl CreationLimiter {
    /// `qps` tokens per second, burst of 1.
    pub fn new(qps: f64) -> Self {
        let period = Duration::try_from_secs_f64(1.0 / qps).unwrap_or(MAX_PERIOD);
        let quota = Quota::with_period(period.min(MAX_PERIOD))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Take a token, or return how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

impl std::fmt::Debug for CreationLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationLimiter").finish_non_exhaustive()
    }
}

/// Synthesis is pending and the composition is alive.
///
/// The caller must also have gotten `WorkerDecision::None`.
pub fn should_create(composition: &Composition) -> bool {
    !composition.is_deleting()
        && composition
            .status
            .current_state
            .as_ref()
            .is_some_and(|state| !state.synthesized)
}

/// Worker for the composition's current generation, built from the synthesizer.
pub fn build_worker(
    name: String,
    composition: &Composition,
    synthesizer: &Synthesizer,
    now: DateTime<Utc>,
) -> Worker {
    let mut metadata = ObjectMeta::new(composition.metadata.namespace.clone(), name);
    metadata.creation_timestamp = Some(now);
    Worker {
        metadata,
        owner: composition.metadata.name.clone(),
        origin: WorkerOrigin::of(composition, synthesizer),
        image: synthesizer.spec.image.clone(),
        command: synthesizer.spec.command.clone(),
    }
}
