//! Semantic invariants for a session snapshot that serde cannot express.

use std::collections::HashSet;

use crate::core::split::phase_label;
use crate::session::Session;

/// Check session invariants:
/// - Phase ids are unique and sequential (`A`, `B`, ...)
/// - No phase is empty
/// - Each task (id + source line) belongs to exactly one phase
/// - `current_phase_index` is in range, and `None` when there are no phases
/// - `retry_count <= max_retries`
/// - Task counters agree with the phase list
pub fn validate_session(session: &Session, max_retries: u32) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen_phase_ids = HashSet::new();
    let mut seen_tasks = HashSet::new();

    for (idx, phase) in session.phases.iter().enumerate() {
        if !seen_phase_ids.insert(phase.id.as_str()) {
            errors.push(format!("duplicate phase id '{}'", phase.id));
        }
        let expected = phase_label(idx);
        if phase.id != expected {
            errors.push(format!(
                "phase at index {idx} has id '{}' (expected '{expected}')",
                phase.id
            ));
        }
        if phase.tasks.is_empty() {
            errors.push(format!("phase '{}' has no tasks", phase.id));
        }
        if phase.retry_count > max_retries {
            errors.push(format!(
                "phase '{}': retry_count {} exceeds max_retries {}",
                phase.id, phase.retry_count, max_retries
            ));
        }
        for task in &phase.tasks {
            if !seen_tasks.insert((task.id.as_str(), task.line_start)) {
                errors.push(format!(
                    "task '{}' (line {}) appears in more than one phase",
                    task.id, task.line_start
                ));
            }
        }
    }

    match session.current_phase_index {
        Some(idx) if idx >= session.phases.len() => errors.push(format!(
            "current_phase_index {idx} out of range ({} phases)",
            session.phases.len()
        )),
        _ => {}
    }

    let task_total: usize = session.phases.iter().map(|phase| phase.tasks.len()).sum();
    if session.total_tasks != task_total {
        errors.push(format!(
            "total_tasks {} does not match {} tasks across phases",
            session.total_tasks, task_total
        ));
    }
    if session.completed_tasks > session.total_tasks {
        errors.push(format!(
            "completed_tasks {} exceeds total_tasks {}",
            session.completed_tasks, session.total_tasks
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{phase_with_tasks, session_with_phases, task};

    #[test]
    fn valid_session_has_no_errors() {
        let session = session_with_phases(vec![
            phase_with_tasks("A", vec![task("A1", 1)]),
            phase_with_tasks("B", vec![task("B1", 1)]),
        ]);
        assert!(validate_session(&session, 3).is_empty());
    }

    #[test]
    fn reports_each_violation() {
        let mut dup_task = task("A1", 1);
        dup_task.line_start = 1;
        let mut session = session_with_phases(vec![
            phase_with_tasks("A", vec![task("A1", 1)]),
            phase_with_tasks("C", vec![dup_task]),
            phase_with_tasks("C", Vec::new()),
        ]);
        session.phases[0].retry_count = 4;
        session.current_phase_index = Some(7);
        session.completed_tasks = 10;

        let errors = validate_session(&session, 3);
        assert!(errors.iter().any(|e| e.contains("duplicate phase id 'C'")));
        assert!(errors.iter().any(|e| e.contains("expected 'B'")));
        assert!(errors.iter().any(|e| e.contains("has no tasks")));
        assert!(errors.iter().any(|e| e.contains("more than one phase")));
        assert!(errors.iter().any(|e| e.contains("retry_count 4")));
        assert!(errors.iter().any(|e| e.contains("out of range")));
        assert!(errors.iter().any(|e| e.contains("completed_tasks 10")));
    }

    #[test]
    fn empty_session_is_valid() {
        let session = session_with_phases(Vec::new());
        assert!(validate_session(&session, 0).is_empty());
    }
}
