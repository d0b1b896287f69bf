//! Deterministic phase selection.

use crate::core::types::PhaseState;
use crate::session::Phase;

/// Index of the first `pending` phase in plan order.
///
/// Returns `None` when every phase is completed, skipped, errored, or in flight.
pub fn next_pending_phase(phases: &[Phase]) -> Option<usize> {
    phases
        .iter()
        .position(|phase| phase.state == PhaseState::Pending)
}

/// True when there are phases and all of them are completed or skipped.
pub fn is_exhausted(phases: &[Phase]) -> bool {
    !phases.is_empty() && phases.iter().all(|phase| phase.state.is_terminal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{phase_with_tasks, task};

    fn phase_in(id: &str, state: PhaseState) -> Phase {
        let mut phase = phase_with_tasks(id, vec![task(&format!("{id}1"), 1)]);
        phase.state = state;
        phase
    }

    #[test]
    fn picks_first_pending_after_terminal_phases() {
        let phases = vec![
            phase_in("A", PhaseState::Completed),
            phase_in("B", PhaseState::Skipped),
            phase_in("C", PhaseState::Pending),
            phase_in("D", PhaseState::Pending),
        ];
        assert_eq!(next_pending_phase(&phases), Some(2));
        assert!(!is_exhausted(&phases));
    }

    #[test]
    fn errored_phase_is_not_selected() {
        let phases = vec![
            phase_in("A", PhaseState::Error),
            phase_in("B", PhaseState::Pending),
        ];
        assert_eq!(next_pending_phase(&phases), Some(1));
    }

    #[test]
    fn exhausted_only_when_all_terminal() {
        let phases = vec![
            phase_in("A", PhaseState::Completed),
            phase_in("B", PhaseState::Skipped),
        ];
        assert_eq!(next_pending_phase(&phases), None);
        assert!(is_exhausted(&phases));
        assert!(!is_exhausted(&[]));
    }
}
