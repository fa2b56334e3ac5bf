//! Status state machine: when to start a new synthesis cycle, and the
//! double-buffer swap that starts it.

use crate::domain::{Composition, SynthesisRecord};

/// The current record is missing or targets an older generation.
pub fn needs_swap(composition: &Composition) -> bool {
    composition
        .status
        .current_state
        .as_ref()
        .is_none_or(|state| state.observed_composition_generation != composition.generation())
}

/// Starts a cycle for the composition's current generation.
///
/// A fully synthesized current record moves to `previous_state` so resources
/// derived from it are not orphaned before the new cycle completes. An
/// unfinished one is dropped and the existing `previous_state` stays.
pub fn swap_states(composition: &mut Composition) {
    let status = &mut composition.status;
    if let Some(current) = status.current_state.take()
        && current.synthesized
    {
        status.previous_state = Some(current);
    }
    status.current_state = Some(SynthesisRecord::for_generation(
        composition.metadata.generation,
    ));
}
