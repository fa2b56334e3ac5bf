//! LifecycleController - one reconciliation pass per call
//!
//! # フロー
//! 1. Composition を取得（無ければ何もしない）
//! 2. cleanup finalizer が無ければ付けて終了
//! 3. Worker 一覧と Synthesizer を取得
//! 4. `plan()` で次の 1 ステップを決める
//! 5. そのステップを実行（ストアへの書き込みは最大 1 回）
//!
//! 待ちは `PassResult::requeue_after` で表現する。ここでは sleep も
//! リトライもしない。同じ Composition のパスは dispatcher が直列化する。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::field::Empty;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use super::creation::{CreationLimiter, build_worker};
use super::finalization::{self, FinalizationStep, FinalizerHold};
use super::plan::{PassInput, Step, plan, plan_deletion};
use super::status::swap_states;
use crate::domain::{
    CLEANUP_FINALIZER, Composition, DeleteReason, ObjectKey, ReconcileError, StoreError,
    StoreResultExt, Synthesizer,
};
use crate::ports::{Clock, NameGenerator, Store, SynthesisReporter};

/// What a pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// The composition (or the object being written) disappeared mid-pass.
    Vanished,
    AddedFinalizer,
    DeletedWorker {
        worker: ObjectKey,
        reason: DeleteReason,
    },
    AwaitingWorker,
    RevertedStatus,
    ForcedDeletionGeneration,
    HoldingFinalizer {
        hold: FinalizerHold,
    },
    RemovedFinalizer,
    SwappedStatus,
    RateLimited,
    CreatedWorker {
        worker: ObjectKey,
    },
    WorkerAlreadyExists {
        worker: ObjectKey,
    },
    Converged,
}

impl Action {
    /// Whether the pass wrote to the store.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Action::AddedFinalizer
                | Action::DeletedWorker { .. }
                | Action::RevertedStatus
                | Action::ForcedDeletionGeneration
                | Action::RemovedFinalizer
                | Action::SwappedStatus
                | Action::CreatedWorker { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassResult {
    pub action: Action,

    /// Run the pass again after this long even without a store change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue_after: Option<Duration>,
}

impl PassResult {
    fn done(action: Action) -> Self {
        Self {
            action,
            requeue_after: None,
        }
    }

    fn requeue(action: Action, after: Duration) -> Self {
        Self {
            action,
            requeue_after: Some(after),
        }
    }
}

/// `Ok(false)` when the write target vanished.
fn applied(result: Result<(), StoreError>, context: &'static str) -> Result<bool, ReconcileError> {
    Ok(result
        .ignore_not_found()
        .map_err(ReconcileError::store(context))?
        .is_some())
}

/// Decides and performs the next lifecycle step for synthesis workers.
pub struct LifecycleController {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    names: Arc<dyn NameGenerator>,
    reporter: Arc<dyn SynthesisReporter>,
    limiter: Arc<CreationLimiter>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        names: Arc<dyn NameGenerator>,
        reporter: Arc<dyn SynthesisReporter>,
        limiter: Arc<CreationLimiter>,
    ) -> Self {
        Self {
            store,
            clock,
            names,
            reporter,
            limiter,
        }
    }

    /// Run one reconciliation pass for the composition at `key`.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<PassResult, ReconcileError> {
        let composition = match self
            .store
            .get_composition(key)
            .await
            .ignore_not_found()
            .map_err(ReconcileError::store("getting composition"))?
        {
            Some(composition) => composition,
            None => {
                debug!(composition = %key, "composition not found");
                return Ok(PassResult::done(Action::Vanished));
            }
        };

        let span = info_span!(
            "reconcile",
            composition_namespace = %composition.metadata.namespace,
            composition_name = %composition.metadata.name,
            composition_generation = composition.generation(),
            synthesizer_name = Empty,
            synthesizer_generation = Empty,
        );
        self.reconcile_composition(composition)
            .instrument(span)
            .await
    }

    async fn reconcile_composition(
        &self,
        mut composition: Composition,
    ) -> Result<PassResult, ReconcileError> {
        // Compositions must not disappear before their workers and status
        // bookkeeping are cleaned up.
        if finalization::needs_finalizer(&composition) {
            composition.metadata.add_finalizer(CLEANUP_FINALIZER);
            let result = self.store.update_composition(&composition).await;
            if !applied(result, "adding cleanup finalizer")? {
                return Ok(PassResult::done(Action::Vanished));
            }
            info!("added cleanup finalizer to composition");
            return Ok(PassResult::done(Action::AddedFinalizer));
        }

        let workers = self
            .store
            .list_workers(&composition.key())
            .await
            .map_err(ReconcileError::store("listing workers"))?;

        let synthesizer = self
            .store
            .get_synthesizer(&composition.synthesizer_key())
            .await
            .ignore_not_found()
            .map_err(ReconcileError::store("getting synthesizer"))?;
        let Some(synthesizer) = synthesizer else {
            let err = missing_synthesizer(&composition);
            if !composition.is_deleting() {
                return Err(err);
            }
            // Deletion never depends on the synthesizer.
            warn!(error = %err, "finalizing composition without its synthesizer");
            let step = plan_deletion(&composition, &workers);
            return self.execute(step, composition, None).await;
        };
        let span = Span::current();
        span.record("synthesizer_name", synthesizer.metadata.name.as_str());
        span.record("synthesizer_generation", synthesizer.metadata.generation);

        let step = plan(
            &PassInput {
                composition: &composition,
                synthesizer: &synthesizer,
                workers: &workers,
            },
            self.clock.now(),
        );
        self.execute(step, composition, Some(&synthesizer)).await
    }

    async fn execute(
        &self,
        step: Step,
        mut composition: Composition,
        synthesizer: Option<&Synthesizer>,
    ) -> Result<PassResult, ReconcileError> {
        let key = composition.key();
        match step {
            Step::DeleteWorker { worker, reason } => {
                let latency_ms = self.report_deletion(&composition, reason);
                let result = self.store.delete_worker(&worker).await;
                if !applied(result, "deleting worker")? {
                    return Ok(PassResult::done(Action::Vanished));
                }
                info!(
                    worker_name = %worker.name,
                    reason = %reason,
                    latency_ms,
                    "deleted synthesizer worker"
                );
                Ok(PassResult::done(Action::DeletedWorker { worker, reason }))
            }

            // Still running. Poll to catch the timeout.
            Step::AwaitWorker { recheck_after } => {
                debug!(
                    recheck_after_ms = duration_ms(recheck_after),
                    "synthesizer worker still running"
                );
                Ok(PassResult::requeue(Action::AwaitingWorker, recheck_after))
            }

            Step::Finalize(FinalizationStep::RevertStatus) => {
                finalization::revert_status(&mut composition);
                let result = self.store.update_composition_status(&composition).await;
                if !applied(result, "reverting swapped status for deletion")? {
                    return Ok(PassResult::done(Action::Vanished));
                }
                info!("reverted swapped status for deletion");
                Ok(PassResult::done(Action::RevertedStatus))
            }

            Step::Finalize(FinalizationStep::ForceGeneration) => {
                finalization::force_generation(&mut composition);
                let result = self.store.update_composition_status(&composition).await;
                if !applied(result, "updating current composition generation")? {
                    return Ok(PassResult::done(Action::Vanished));
                }
                info!("updated composition status to reflect deletion");
                Ok(PassResult::done(Action::ForcedDeletionGeneration))
            }

            Step::Finalize(FinalizationStep::Hold(hold)) => {
                debug!(?hold, "refusing to remove composition finalizer");
                Ok(PassResult::done(Action::HoldingFinalizer { hold }))
            }

            Step::Finalize(FinalizationStep::RemoveFinalizer) => {
                composition.metadata.remove_finalizer(CLEANUP_FINALIZER);
                let result = self.store.update_composition(&composition).await;
                if !applied(result, "removing cleanup finalizer")? {
                    return Ok(PassResult::done(Action::Vanished));
                }
                info!("removed cleanup finalizer from composition");
                Ok(PassResult::done(Action::RemovedFinalizer))
            }

            // Persist and stop: creating a worker now would use a status
            // value that is about to be replaced.
            Step::SwapStatus => {
                swap_states(&mut composition);
                let result = self.store.update_composition_status(&composition).await;
                if !applied(result, "swapping composition state")? {
                    return Ok(PassResult::done(Action::Vanished));
                }
                info!("started synthesis");
                Ok(PassResult::done(Action::SwappedStatus))
            }

            Step::CreateWorker => {
                let Some(synthesizer) = synthesizer else {
                    return Err(missing_synthesizer(&composition));
                };
                if let Err(wait) = self.limiter.try_acquire() {
                    debug!(
                        wait_ms = duration_ms(wait),
                        "worker creation deferred by rate limit"
                    );
                    return Ok(PassResult::requeue(Action::RateLimited, wait));
                }

                let name = self.names.worker_name(&key);
                let worker = build_worker(name, &composition, synthesizer, self.clock.now());
                let created = self
                    .store
                    .create_worker(&worker)
                    .await
                    .ignore_already_exists()
                    .map_err(ReconcileError::store("creating worker"))?;
                if created.is_none() {
                    debug!(worker_name = %worker.metadata.name, "synthesizer worker already exists");
                    return Ok(PassResult::done(Action::WorkerAlreadyExists {
                        worker: worker.key(),
                    }));
                }

                self.reporter.synthesis_started(&key);
                info!(worker_name = %worker.metadata.name, "created synthesizer worker");
                Ok(PassResult::done(Action::CreatedWorker {
                    worker: worker.key(),
                }))
            }

            Step::Finalize(FinalizationStep::Released) | Step::Converged => {
                Ok(PassResult::done(Action::Converged))
            }
        }
    }

    /// Emits the observability events tied to a deletion. Returns the
    /// synthesis latency for successful workers.
    fn report_deletion(&self, composition: &Composition, reason: DeleteReason) -> Option<u64> {
        let key = composition.key();
        match reason {
            DeleteReason::Success => {
                let created = composition
                    .status
                    .current_state
                    .as_ref()
                    .and_then(|state| state.pod_creation)?;
                let latency = self
                    .clock
                    .now()
                    .signed_duration_since(created)
                    .to_std()
                    .unwrap_or_default();
                self.reporter.synthesis_latency(&key, latency);
                Some(duration_ms(latency))
            }
            DeleteReason::Timeout => {
                self.reporter.worker_timed_out(&key);
                None
            }
            DeleteReason::CompositionDeleted | DeleteReason::Superseded => None,
        }
    }
}

fn missing_synthesizer(composition: &Composition) -> ReconcileError {
    ReconcileError::MissingSynthesizer {
        synthesizer: composition.spec.synthesizer.name.clone(),
        composition: composition.key(),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{ControllerBuilder, ControllerConfig};
    use crate::domain::{
        CompositionStatus, ErrorKind, ObjectMeta, SynthesisRecord, Worker, WorkerOrigin,
    };
    use crate::impls::{InMemoryStore, RecordingReporter};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    const POD_TIMEOUT: Duration = Duration::from_secs(300);
    const UNLIMITED_QPS: f64 = 1e9;

    struct FixedNames(&'static str);

    impl NameGenerator for FixedNames {
        fn worker_name(&self, _composition: &ObjectKey) -> String {
            self.0.to_string()
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        clock: FixedClock,
        reporter: Arc<RecordingReporter>,
        controller: LifecycleController,
        synthesizer: Synthesizer,
    }

    async fn harness_with(qps: f64, names: Option<Arc<dyn NameGenerator>>) -> Harness {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let store = Arc::new(
            InMemoryStore::new(Arc::new(clock.clone())).with_graceful_worker_deletion(),
        );
        let synthesizer = store
            .insert_synthesizer(Synthesizer::new("helm", "helm:1").with_pod_timeout(POD_TIMEOUT))
            .await;
        let reporter = Arc::new(RecordingReporter::new());

        let mut builder = ControllerBuilder::new(store.clone())
            .config(ControllerConfig { creation_qps: qps })
            .clock(Arc::new(clock.clone()))
            .reporter(reporter.clone());
        if let Some(names) = names {
            builder = builder.names(names);
        }

        Harness {
            store,
            clock,
            reporter,
            controller: builder.build().unwrap(),
            synthesizer,
        }
    }

    async fn harness() -> Harness {
        harness_with(UNLIMITED_QPS, None).await
    }

    fn composition(
        name: &str,
        generation: u64,
        current: Option<SynthesisRecord>,
        previous: Option<SynthesisRecord>,
    ) -> Composition {
        let mut comp = Composition::new("ns", name, "helm");
        comp.metadata.generation = generation;
        comp.metadata.add_finalizer(CLEANUP_FINALIZER);
        comp.status = CompositionStatus {
            current_state: current,
            previous_state: previous,
        };
        comp
    }

    fn record(generation: u64, synthesized: bool) -> SynthesisRecord {
        SynthesisRecord {
            synthesized,
            ..SynthesisRecord::for_generation(generation)
        }
    }

    impl Harness {
        async fn insert(&self, comp: Composition) -> ObjectKey {
            self.store.insert_composition(comp).await.key()
        }

        fn worker(&self, comp: &Composition, name: &str, age: Duration) -> Worker {
            let mut metadata = ObjectMeta::new("ns", name);
            metadata.creation_timestamp =
                Some(self.clock.now() - chrono::Duration::from_std(age).unwrap());
            Worker {
                metadata,
                owner: comp.metadata.name.clone(),
                origin: WorkerOrigin::of(comp, &self.synthesizer),
                image: self.synthesizer.spec.image.clone(),
                command: Vec::new(),
            }
        }

        fn terminating(&self, mut worker: Worker) -> Worker {
            worker.metadata.deletion_timestamp = Some(self.clock.now());
            worker
        }

        async fn pass(&self, key: &ObjectKey) -> PassResult {
            self.controller.reconcile(key).await.unwrap()
        }

        async fn action(&self, key: &ObjectKey) -> Action {
            self.pass(key).await.action
        }

        async fn status(&self, key: &ObjectKey) -> CompositionStatus {
            self.store.composition(key).await.unwrap().status
        }

        async fn live_workers(&self, key: &ObjectKey) -> Vec<Worker> {
            self.store
                .workers()
                .await
                .into_iter()
                .filter(|w| w.owner_key() == *key && !w.is_terminating())
                .collect()
        }

        /// What the worker and the downstream reconciler would write.
        async fn complete_synthesis(&self, key: &ObjectKey, reconciled: bool) {
            let pod_creation = self
                .live_workers(key)
                .await
                .first()
                .and_then(|w| w.metadata.creation_timestamp);
            let mut status = self.status(key).await;
            let current = status.current_state.as_mut().unwrap();
            current.synthesized = true;
            current.reconciled = reconciled;
            current.ready = reconciled;
            current.pod_creation = pod_creation;
            self.store.set_composition_status(key, status).await.unwrap();
        }

        async fn mark_reconciled(&self, key: &ObjectKey) {
            let mut status = self.status(key).await;
            let current = status.current_state.as_mut().unwrap();
            current.reconciled = true;
            current.ready = true;
            self.store.set_composition_status(key, status).await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_pass_only_attaches_finalizer() {
        let h = harness().await;
        let key = h.insert(Composition::new("ns", "web", "helm")).await;

        assert_eq!(h.action(&key).await, Action::AddedFinalizer);

        let stored = h.store.composition(&key).await.unwrap();
        assert!(stored.metadata.has_finalizer(CLEANUP_FINALIZER));
        assert_eq!(stored.status, CompositionStatus::default());
        assert_eq!(h.store.mutations().await, 1);
    }

    #[tokio::test]
    async fn scenario_a_new_generation_preserves_synthesized_state() {
        let h = harness().await;
        let key = h
            .insert(composition("web", 6, Some(record(5, true)), None))
            .await;

        assert_eq!(h.action(&key).await, Action::SwappedStatus);

        let status = h.status(&key).await;
        assert_eq!(status.previous_state, Some(record(5, true)));
        assert_eq!(status.current_state, Some(SynthesisRecord::for_generation(6)));
        assert!(h.store.workers().await.is_empty());
    }

    #[tokio::test]
    async fn scenario_b_pending_synthesis_creates_worker() {
        let h = harness().await;
        let key = h
            .insert(composition("web", 6, Some(record(6, false)), None))
            .await;

        let Action::CreatedWorker { worker } = h.action(&key).await else {
            panic!("expected a worker to be created");
        };

        assert_eq!(h.reporter.syntheses_started(), 1);
        let workers = h.store.workers().await;
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].key(), worker);
        assert!(worker.name.starts_with("web-"));
        let comp = h.store.composition(&key).await.unwrap();
        assert!(workers[0].is_derived_from(&comp, &h.synthesizer));
    }

    #[tokio::test]
    async fn scenario_c_stuck_worker_times_out() {
        let h = harness().await;
        let comp = composition("web", 6, Some(record(6, false)), None);
        let stuck = h.worker(&comp, "web-1", Duration::from_secs(6 * 60));
        let key = h.insert(comp).await;
        h.store.insert_worker(stuck.clone()).await;

        assert_eq!(
            h.action(&key).await,
            Action::DeletedWorker {
                worker: stuck.key(),
                reason: DeleteReason::Timeout,
            }
        );
        assert_eq!(h.reporter.worker_timeouts(), 1);
        assert!(h.live_workers(&key).await.is_empty());
    }

    #[tokio::test]
    async fn scenario_d_deletion_reverts_in_flight_synthesis() {
        let h = harness().await;
        let mut comp = composition("web", 5, Some(record(4, false)), Some(record(3, true)));
        comp.metadata.deletion_timestamp = Some(h.clock.now());
        let key = h.insert(comp).await;

        assert_eq!(h.action(&key).await, Action::RevertedStatus);

        let status = h.status(&key).await;
        assert_eq!(status.current_state, Some(record(3, true)));
        assert_eq!(status.previous_state, None);
    }

    #[tokio::test]
    async fn scenario_e_one_terminating_worker_allows_replacement() {
        let h = harness().await;
        let comp = composition("web", 6, Some(record(6, false)), None);
        let old = h.terminating(h.worker(&comp, "web-old", Duration::from_secs(30)));
        let key = h.insert(comp).await;
        h.store.insert_worker(old).await;

        assert!(matches!(
            h.action(&key).await,
            Action::CreatedWorker { .. }
        ));
        assert_eq!(h.store.workers().await.len(), 2);
        assert_eq!(h.live_workers(&key).await.len(), 1);
    }

    #[tokio::test]
    async fn scenario_f_two_terminating_workers_block_creation() {
        let h = harness().await;
        let comp = composition("web", 6, Some(record(6, false)), None);
        let a = h.terminating(h.worker(&comp, "web-a", Duration::from_secs(30)));
        let b = h.terminating(h.worker(&comp, "web-b", Duration::from_secs(40)));
        let key = h.insert(comp).await;
        h.store.insert_worker(a).await;
        h.store.insert_worker(b).await;

        assert_eq!(
            h.pass(&key).await,
            PassResult::requeue(Action::AwaitingWorker, POD_TIMEOUT)
        );
        assert_eq!(h.reporter.syntheses_started(), 0);
        assert_eq!(h.store.mutations().await, 0);
    }

    #[tokio::test]
    async fn running_worker_is_polled_until_its_timeout() {
        let h = harness().await;
        let comp = composition("web", 6, Some(record(6, false)), None);
        let running = h.worker(&comp, "web-1", Duration::from_secs(60));
        let key = h.insert(comp).await;
        h.store.insert_worker(running).await;

        assert_eq!(
            h.pass(&key).await,
            PassResult::requeue(Action::AwaitingWorker, Duration::from_secs(240))
        );
    }

    #[tokio::test]
    async fn successful_worker_is_deleted_and_latency_reported() {
        let h = harness().await;
        let comp = composition("web", 6, Some(record(6, false)), None);
        let done = h.worker(&comp, "web-1", Duration::from_secs(90));
        let key = h.insert(comp).await;
        h.store.insert_worker(done.clone()).await;
        h.complete_synthesis(&key, false).await;

        assert_eq!(
            h.action(&key).await,
            Action::DeletedWorker {
                worker: done.key(),
                reason: DeleteReason::Success,
            }
        );
        assert_eq!(h.reporter.latencies(), vec![Duration::from_secs(90)]);
    }

    #[tokio::test]
    async fn converged_composition_is_left_alone() {
        let h = harness().await;
        let key = h.insert(Composition::new("ns", "web", "helm")).await;

        assert_eq!(h.action(&key).await, Action::AddedFinalizer);
        assert_eq!(h.action(&key).await, Action::SwappedStatus);
        assert!(matches!(h.action(&key).await, Action::CreatedWorker { .. }));
        // A second pass before the worker finishes only waits.
        assert_eq!(h.action(&key).await, Action::AwaitingWorker);

        h.complete_synthesis(&key, true).await;
        assert!(matches!(
            h.action(&key).await,
            Action::DeletedWorker {
                reason: DeleteReason::Success,
                ..
            }
        ));
        h.store.reap_terminating().await;

        let mutations = h.store.mutations().await;
        for _ in 0..2 {
            let result = h.pass(&key).await;
            assert_eq!(result, PassResult::done(Action::Converged));
            assert!(!result.action.is_mutation());
        }
        assert_eq!(h.store.mutations().await, mutations);
        assert_eq!(h.reporter.syntheses_started(), 1);
    }

    #[tokio::test]
    async fn generation_bump_converges_without_orphaning() {
        let h = harness().await;
        let key = h
            .insert(composition(
                "web",
                1,
                Some(SynthesisRecord {
                    reconciled: true,
                    ready: true,
                    ..record(1, true)
                }),
                None,
            ))
            .await;
        assert_eq!(h.action(&key).await, Action::Converged);

        h.store.bump_composition_generation(&key).await.unwrap();

        assert_eq!(h.action(&key).await, Action::SwappedStatus);
        let status = h.status(&key).await;
        assert_eq!(status.previous_state.unwrap().observed_composition_generation, 1);

        assert!(matches!(h.action(&key).await, Action::CreatedWorker { .. }));
        h.complete_synthesis(&key, true).await;
        assert!(matches!(h.action(&key).await, Action::DeletedWorker { .. }));
        assert_eq!(h.action(&key).await, Action::Converged);

        let status = h.status(&key).await;
        let current = status.current_state.unwrap();
        assert_eq!(current.observed_composition_generation, 2);
        assert!(current.synthesized);
        assert_eq!(status.previous_state.unwrap().observed_composition_generation, 1);
    }

    #[tokio::test]
    async fn synthesizer_update_supersedes_running_worker() {
        let h = harness().await;
        let comp = composition("web", 3, Some(record(3, false)), None);
        let running = h.worker(&comp, "web-1", Duration::from_secs(10));
        let key = h.insert(comp).await;
        h.store.insert_worker(running.clone()).await;

        h.store
            .bump_synthesizer_generation(&h.synthesizer.key())
            .await
            .unwrap();

        assert_eq!(
            h.action(&key).await,
            Action::DeletedWorker {
                worker: running.key(),
                reason: DeleteReason::Superseded,
            }
        );
        // The terminating worker is skipped and its replacement is created.
        assert!(matches!(h.action(&key).await, Action::CreatedWorker { .. }));
    }

    #[tokio::test]
    async fn deletion_during_synthesis_releases_the_finalizer() {
        let h = harness().await;
        let comp = composition(
            "web",
            2,
            Some(record(2, false)),
            Some(SynthesisRecord {
                reconciled: true,
                ready: true,
                ..record(1, true)
            }),
        );
        let running = h.worker(&comp, "web-1", Duration::from_secs(10));
        let key = h.insert(comp).await;
        h.store.insert_worker(running.clone()).await;

        h.store.request_composition_deletion(&key).await.unwrap();

        assert_eq!(
            h.action(&key).await,
            Action::DeletedWorker {
                worker: running.key(),
                reason: DeleteReason::CompositionDeleted,
            }
        );
        h.store.reap_terminating().await;

        assert_eq!(h.action(&key).await, Action::RevertedStatus);
        assert_eq!(h.action(&key).await, Action::ForcedDeletionGeneration);
        let current = h.status(&key).await.current_state.unwrap();
        assert_eq!(current.observed_composition_generation, 3);
        assert!(current.synthesized);
        assert!(!current.reconciled);
        assert!(!current.ready);

        assert_eq!(
            h.pass(&key).await,
            PassResult::done(Action::HoldingFinalizer {
                hold: FinalizerHold::NotReconciled
            })
        );

        h.mark_reconciled(&key).await;
        assert_eq!(h.action(&key).await, Action::RemovedFinalizer);
        assert!(h.store.composition(&key).await.is_none());
        assert_eq!(h.action(&key).await, Action::Vanished);
        assert_eq!(h.reporter.syntheses_started(), 0);
    }

    #[tokio::test]
    async fn deletion_completes_without_synthesizer() {
        let h = harness().await;
        let mut comp = composition(
            "web",
            4,
            Some(SynthesisRecord {
                reconciled: true,
                ready: true,
                ..record(4, true)
            }),
            None,
        );
        comp.spec.synthesizer.name = "gone".into();
        let leftover = h.worker(&comp, "web-1", Duration::from_secs(10));
        let key = h.insert(comp).await;
        h.store.insert_worker(leftover.clone()).await;

        let err = h.controller.reconcile(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        h.store.request_composition_deletion(&key).await.unwrap();

        assert_eq!(
            h.action(&key).await,
            Action::DeletedWorker {
                worker: leftover.key(),
                reason: DeleteReason::CompositionDeleted,
            }
        );
        h.store.reap_terminating().await;

        assert_eq!(h.action(&key).await, Action::ForcedDeletionGeneration);
        assert_eq!(
            h.action(&key).await,
            Action::HoldingFinalizer {
                hold: FinalizerHold::NotReconciled
            }
        );
        h.mark_reconciled(&key).await;
        assert_eq!(h.action(&key).await, Action::RemovedFinalizer);
        assert!(h.store.composition(&key).await.is_none());
    }

    #[test]
    fn only_writing_actions_are_mutations() {
        assert!(Action::SwappedStatus.is_mutation());
        assert!(
            Action::CreatedWorker {
                worker: ObjectKey::new("ns", "web-1"),
            }
            .is_mutation()
        );
        assert!(!Action::RateLimited.is_mutation());
        assert!(
            !Action::WorkerAlreadyExists {
                worker: ObjectKey::new("ns", "web-1"),
            }
            .is_mutation()
        );
        assert!(
            !Action::HoldingFinalizer {
                hold: FinalizerHold::WorkersRemain
            }
            .is_mutation()
        );
    }

    #[tokio::test]
    async fn store_outage_is_a_retryable_error() {
        let h = harness().await;
        let key = h
            .insert(composition("web", 6, Some(record(6, false)), None))
            .await;
        h.store.fail_next("connection refused").await;

        let err = h.controller.reconcile(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("getting composition"));

        assert!(matches!(h.action(&key).await, Action::CreatedWorker { .. }));
    }

    #[tokio::test]
    async fn missing_synthesizer_is_surfaced() {
        let h = harness().await;
        let mut comp = composition("web", 1, None, None);
        comp.spec.synthesizer.name = "kustomize".into();
        let key = h.insert(comp).await;

        let err = h.controller.reconcile(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(
            err,
            ReconcileError::MissingSynthesizer { ref synthesizer, .. } if synthesizer == "kustomize"
        ));
    }

    #[tokio::test]
    async fn missing_composition_is_nothing_to_do() {
        let h = harness().await;
        assert_eq!(
            h.pass(&ObjectKey::new("ns", "gone")).await,
            PassResult::done(Action::Vanished)
        );
    }

    #[tokio::test]
    async fn creations_share_one_token_bucket() {
        let h = harness_with(0.001, None).await;
        let web = h
            .insert(composition("web", 1, Some(record(1, false)), None))
            .await;
        let api = h
            .insert(composition("api", 1, Some(record(1, false)), None))
            .await;

        assert!(matches!(h.action(&web).await, Action::CreatedWorker { .. }));

        let deferred = h.pass(&api).await;
        assert_eq!(deferred.action, Action::RateLimited);
        assert!(deferred.requeue_after.unwrap() > Duration::ZERO);
        assert_eq!(h.reporter.syntheses_started(), 1);
        assert!(h.live_workers(&api).await.is_empty());
    }

    #[tokio::test]
    async fn worker_created_by_a_racing_pass_is_benign() {
        let h = harness_with(UNLIMITED_QPS, Some(Arc::new(FixedNames("web-fixed")))).await;
        let comp = composition("web", 1, Some(record(1, false)), None);
        // Same name, but not (yet) visible in the owner index for "web".
        let other = composition("api", 1, None, None);
        h.store
            .insert_worker(h.worker(&other, "web-fixed", Duration::ZERO))
            .await;
        let key = h.insert(comp).await;

        assert_eq!(
            h.action(&key).await,
            Action::WorkerAlreadyExists {
                worker: ObjectKey::new("ns", "web-fixed"),
            }
        );
        assert_eq!(h.reporter.syntheses_started(), 0);
    }

    #[tokio::test]
    async fn at_most_one_live_worker_through_churn() {
        let h = harness().await;
        let key = h.insert(Composition::new("ns", "web", "helm")).await;

        for round in 0..80u32 {
            let result = h.pass(&key).await;
            assert!(result.action != Action::Vanished);

            let all: Vec<Worker> = h
                .store
                .workers()
                .await
                .into_iter()
                .filter(|w| w.owner_key() == key)
                .collect();
            let live = all.iter().filter(|w| !w.is_terminating()).count();
            assert!(live <= 1, "round {round}: {live} live workers");
            assert!(all.len() <= 2, "round {round}: {} workers", all.len());

            let has_live = !h.live_workers(&key).await.is_empty();
            match round % 10 {
                3 => {
                    h.store.bump_composition_generation(&key).await.unwrap();
                }
                5 if has_live => {
                    h.complete_synthesis(&key, true).await;
                }
                7 => h.clock.advance(POD_TIMEOUT + Duration::from_secs(1)),
                9 => {
                    h.store.reap_terminating().await;
                }
                _ => {}
            }
        }

        // Quiet period: it settles on the latest generation.
        for _ in 0..10 {
            if h.live_workers(&key).await.is_empty() {
                h.store.reap_terminating().await;
            }
            if matches!(h.action(&key).await, Action::AwaitingWorker) {
                h.complete_synthesis(&key, true).await;
            }
        }
        let comp = h.store.composition(&key).await.unwrap();
        let current = comp.status.current_state.unwrap();
        assert_eq!(current.observed_composition_generation, comp.metadata.generation);
        assert!(current.synthesized);
    }
}
