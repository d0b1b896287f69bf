//! Order-preserving split of tasks into size-bounded phases.

use crate::session::{Phase, Task};

/// Per-phase size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitLimits {
    pub max_tasks: usize,
    pub max_tokens: usize,
}

/// Split tasks into phases.
///
/// Consecutive tasks sharing a phase letter form a group; each group is cut
/// into batches that respect both limits, and batches never cross group
/// boundaries. A task that alone exceeds `max_tokens` still gets its own
/// phase. Phase ids are assigned sequentially (`A`, `B`, ..., `Z`, `AA`, ...).
pub fn split_into_phases(tasks: &[Task], limits: SplitLimits) -> Vec<Phase> {
    let mut batches: Vec<Vec<Task>> = Vec::new();

    for group in tasks.chunk_by(|a, b| a.phase_letter == b.phase_letter) {
        let mut batch: Vec<Task> = Vec::new();
        let mut batch_tokens = 0usize;
        for task in group {
            let over_count = batch.len() + 1 > limits.max_tasks;
            let over_tokens = batch_tokens.saturating_add(task.estimated_tokens) > limits.max_tokens;
            if !batch.is_empty() && (over_count || over_tokens) {
                batches.push(std::mem::take(&mut batch));
                batch_tokens = 0;
            }
            batch_tokens = batch_tokens.saturating_add(task.estimated_tokens);
            batch.push(task.clone());
        }
        if !batch.is_empty() {
            batches.push(batch);
        }
    }

    batches
        .into_iter()
        .enumerate()
        .map(|(idx, batch)| Phase::new(phase_label(idx), batch))
        .collect()
}

/// Sequential phase label for a zero-based index: 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn phase_label(index: usize) -> String {
    let mut n = index + 1;
    let mut label = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        label.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    label.reverse();
    String::from_utf8(label).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_in};

    fn layout(phases: &[Phase]) -> Vec<(String, Vec<String>)> {
        phases
            .iter()
            .map(|phase| {
                (
                    phase.id.clone(),
                    phase.tasks.iter().map(|t| t.id.clone()).collect(),
                )
            })
            .collect()
    }

    fn flat_ids(phases: &[Phase]) -> Vec<String> {
        phases
            .iter()
            .flat_map(|phase| phase.tasks.iter().map(|t| t.id.clone()))
            .collect()
    }

    #[test]
    fn splits_by_task_count_within_group() {
        let tasks = vec![task("A1", 1), task("A2", 1), task("A3", 1)];
        let phases = split_into_phases(
            &tasks,
            SplitLimits {
                max_tasks: 2,
                max_tokens: 1_000,
            },
        );
        assert_eq!(
            layout(&phases),
            vec![
                ("A".to_string(), vec!["A1".to_string(), "A2".to_string()]),
                ("B".to_string(), vec!["A3".to_string()]),
            ]
        );
    }

    #[test]
    fn oversized_task_gets_its_own_phase() {
        let tasks = vec![task("A1", 10), task("A2", 5_000), task("A3", 10)];
        let phases = split_into_phases(
            &tasks,
            SplitLimits {
                max_tasks: 10,
                max_tokens: 100,
            },
        );
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[1].task_ids(), vec!["A2"]);
        assert!(phases.iter().all(|phase| !phase.tasks.is_empty()));
    }

    #[test]
    fn group_boundaries_are_never_merged() {
        let tasks = vec![task("A1", 1), task("B1", 1), task("B2", 1), task("C1", 1)];
        let phases = split_into_phases(
            &tasks,
            SplitLimits {
                max_tasks: 10,
                max_tokens: 1_000,
            },
        );
        assert_eq!(
            layout(&phases),
            vec![
                ("A".to_string(), vec!["A1".to_string()]),
                ("B".to_string(), vec!["B1".to_string(), "B2".to_string()]),
                ("C".to_string(), vec!["C1".to_string()]),
            ]
        );
    }

    #[test]
    fn token_limit_cuts_before_overflowing_task() {
        let tasks = vec![task("A1", 60), task("A2", 30), task("A3", 20)];
        let phases = split_into_phases(
            &tasks,
            SplitLimits {
                max_tasks: 10,
                max_tokens: 100,
            },
        );
        assert_eq!(phases[0].task_ids(), vec!["A1", "A2"]);
        assert_eq!(phases[1].task_ids(), vec!["A3"]);
    }

    #[test]
    fn preserves_input_order_for_interleaved_letters() {
        let tasks = vec![
            task_in("A1", 'A', 5),
            task_in("B1", 'B', 5),
            task_in("A2", 'A', 5),
            task_in("A3", 'A', 5),
            task_in("B2", 'B', 5),
        ];
        let phases = split_into_phases(
            &tasks,
            SplitLimits {
                max_tasks: 1,
                max_tokens: 1_000,
            },
        );
        assert_eq!(flat_ids(&phases), vec!["A1", "B1", "A2", "A3", "B2"]);
        assert!(phases.iter().all(|phase| !phase.tasks.is_empty()));
    }

    #[test]
    fn empty_input_yields_no_phases() {
        let phases = split_into_phases(
            &[],
            SplitLimits {
                max_tasks: 1,
                max_tokens: 1,
            },
        );
        assert!(phases.is_empty());
    }

    #[test]
    fn labels_continue_past_z() {
        assert_eq!(phase_label(0), "A");
        assert_eq!(phase_label(25), "Z");
        assert_eq!(phase_label(26), "AA");
        assert_eq!(phase_label(27), "AB");
        assert_eq!(phase_label(701), "ZZ");
        assert_eq!(phase_label(702), "AAA");
    }
}
