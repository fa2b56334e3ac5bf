//! Finalization guard: sequences a composition's deletion so that workers are
//! gone and status bookkeeping has settled before the cleanup finalizer is
//! released.

use serde::Serialize;

use crate::domain::{CLEANUP_FINALIZER, Composition, Worker};

/// Why the finalizer is being kept for now. Each of these clears on an
/// external change that retriggers reconciliation, so no requeue is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinalizerHold {
    /// Downstream resources of the current record are not reconciled yet.
    NotReconciled,
    /// The current record does not target the latest generation.
    GenerationMismatch,
    /// At least one worker (terminating or not) still exists.
    WorkersRemain,
}

/// Next step for a composition that is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationStep {
    /// Put `previous_state` back into `current_state`.
    RevertStatus,
    /// Move the current record to the deletion generation without synthesizing.
    ForceGeneration,
    Hold(FinalizerHold),
    RemoveFinalizer,
    /// Nothing left to do: the finalizer is already gone.
    Released,
}

/// Whether the finalizer must be attached before anything else happens.
pub fn needs_finalizer(composition: &Composition) -> bool {
    !composition.is_deleting() && !composition.metadata.has_finalizer(CLEANUP_FINALIZER)
}

/// Decide the next deletion step. Only meaningful while deleting.
pub fn next_step(composition: &Composition, workers: &[Worker]) -> FinalizationStep {
    let status = &composition.status;

    // A synthesis in flight at deletion time can never finish since no new
    // worker will be created. Fall back to the last complete one.
    let in_flight = status
        .current_state
        .as_ref()
        .is_none_or(|state| !state.synthesized);
    let nothing_to_revert = status.current_state.is_none() && status.previous_state.is_none();
    if in_flight && !nothing_to_revert {
        return FinalizationStep::RevertStatus;
    }

    // Deletion bumped the generation, and the synthesized generation only
    // moves through a completed synthesis. Move it by hand.
    if let Some(current) = &status.current_state
        && current.observed_composition_generation != composition.generation()
    {
        return FinalizationStep::ForceGeneration;
    }

    if !composition.metadata.has_finalizer(CLEANUP_FINALIZER) {
        return FinalizationStep::Released;
    }

    // No current record means nothing was ever synthesized, so there is
    // nothing downstream to wait for.
    if let Some(current) = &status.current_state {
        if !current.reconciled {
            return FinalizationStep::Hold(FinalizerHold::NotReconciled);
        }
        if current.observed_composition_generation != composition.generation() {
            return FinalizationStep::Hold(FinalizerHold::GenerationMismatch);
        }
    }
    if !workers.is_empty() {
        return FinalizationStep::Hold(FinalizerHold::WorkersRemain);
    }

    FinalizationStep::RemoveFinalizer
}

/// `current_state := previous_state`, `previous_state := None`.
pub fn revert_status(composition: &mut Composition) {
    let status = &mut composition.status;
    status.current_state = status.previous_state.take();
}

/// Marks the current record as synthesized for the deletion generation and
/// resets the downstream flags so they are recomputed.
///
/// NOTE: if the prior synthesis had failed, forcing `synthesized = true`
/// claims output that never existed. Kept as is; known-uncertain edge case.
pub fn force_generation(composition: &mut Composition) {
    let generation = composition.generation();
    if let Some(current) = composition.status.current_state.as_mut() {
        current.observed_composition_generation = generation;
        current.synthesized = true;
        current.ready = false;
        current.reconciled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectMeta, SynthesisRecord, WorkerOrigin};
    use chrono::{TimeZone, Utc};

    fn deleting(generation: u64) -> Composition {
        let mut comp = Composition::new("ns", "web", "helm");
        comp.metadata.generation = generation;
        comp.metadata.add_finalizer(CLEANUP_FINALIZER);
        comp.metadata.deletion_timestamp =
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        comp
    }

    fn record(generation: u64, synthesized: bool, reconciled: bool) -> SynthesisRecord {
        SynthesisRecord {
            observed_composition_generation: generation,
            synthesized,
            reconciled,
            ready: reconciled,
            pod_creation: None,
        }
    }

    fn worker() -> Worker {
        Worker {
            metadata: ObjectMeta::new("ns", "web-1"),
            owner: "web".into(),
            origin: WorkerOrigin {
                composition_generation: 4,
                synthesizer_name: "helm".into(),
                synthesizer_generation: 1,
            },
            image: "helm:1".into(),
            command: Vec::new(),
        }
    }

    #[test]
    fn active_composition_without_finalizer_needs_one() {
        let mut comp = Composition::new("ns", "web", "helm");
        assert!(needs_finalizer(&comp));

        comp.metadata.add_finalizer(CLEANUP_FINALIZER);
        assert!(!needs_finalizer(&comp));
    }

    #[test]
    fn deleting_composition_never_gets_a_finalizer() {
        let mut comp = deleting(2);
        comp.metadata.finalizers.clear();
        assert!(!needs_finalizer(&comp));
    }

    #[test]
    fn in_flight_synthesis_is_reverted() {
        let mut comp = deleting(5);
        comp.status.current_state = Some(record(4, false, false));
        comp.status.previous_state = Some(record(3, true, true));

        assert_eq!(next_step(&comp, &[]), FinalizationStep::RevertStatus);
        revert_status(&mut comp);

        assert_eq!(comp.status.current_state, Some(record(3, true, true)));
        assert_eq!(comp.status.previous_state, None);

        let mut comp = deleting(5);
        comp.status.current_state = None;
        comp.status.previous_state = Some(record(3, true, true));

        assert_eq!(next_step(&comp, &[]), FinalizationStep::RevertStatus);
        revert_status(&mut comp);

        assert_eq!(comp.status.current_state, Some(record(3, true, true)));
        assert_eq!(comp.status.previous_state, None);
        assert_eq!(next_step(&comp, &[]), FinalizationStep::ForceGeneration);
    }

    #[test]
    fn stale_generation_is_forced_forward() {
        let mut comp = deleting(5);
        comp.status.current_state = Some(record(3, true, true));

        assert_eq!(next_step(&comp, &[]), FinalizationStep::ForceGeneration);
        force_generation(&mut comp);

        assert_eq!(comp.status.current_state, Some(record(5, true, false)));
    }

    #[test]
    fn waits_for_downstream_reconciliation() {
        let mut comp = deleting(5);
        comp.status.current_state = Some(record(5, true, false));

        assert_eq!(
            next_step(&comp, &[]),
            FinalizationStep::Hold(FinalizerHold::NotReconciled)
        );
    }

    #[test]
    fn waits_for_workers_to_disappear() {
        let mut comp = deleting(5);
        comp.status.current_state = Some(record(5, true, true));

        assert_eq!(
            next_step(&comp, &[worker()]),
            FinalizationStep::Hold(FinalizerHold::WorkersRemain)
        );
        assert_eq!(next_step(&comp, &[]), FinalizationStep::RemoveFinalizer);
    }

    #[test]
    fn never_synthesized_composition_is_released_once_workers_are_gone() {
        let mut comp = deleting(2);
        assert_eq!(
            next_step(&comp, &[worker()]),
            FinalizationStep::Hold(FinalizerHold::WorkersRemain)
        );
        assert_eq!(next_step(&comp, &[]), FinalizationStep::RemoveFinalizer);

        comp.status.current_state = Some(record(1, false, false));
        assert_eq!(next_step(&comp, &[]), FinalizationStep::RevertStatus);
        revert_status(&mut comp);
        assert_eq!(next_step(&comp, &[]), FinalizationStep::RemoveFinalizer);
    }

    #[test]
    fn released_composition_needs_nothing() {
        let mut comp = deleting(5);
        comp.status.current_state = Some(record(5, true, true));
        comp.metadata.finalizers.clear();

        assert_eq!(next_step(&comp, &[]), FinalizationStep::Released);
    }
}
