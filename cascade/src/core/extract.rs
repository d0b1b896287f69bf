//! Task extraction from plan markdown.
//!
//! Only level-3 headings of the exact form `### Task <Letter><Digits>: <Title>`
//! start a task. Numbered list items, `Step N:` lines, other heading levels, and
//! anything inside fenced code blocks are body text.

use std::sync::LazyLock;

use regex::Regex;

use crate::session::Task;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

static TASK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^### Task ([A-Z])([0-9]+): (\S.*?)\s*$").expect("task header regex is valid")
});

static PHASE_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^## phase\b").expect("phase heading regex is valid"));

#[derive(Debug)]
struct Header<'a> {
    line_idx: usize,
    letter: char,
    number: &'a str,
    title: &'a str,
}

fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    ["```", "~~~"]
        .into_iter()
        .find(|marker| trimmed.starts_with(marker))
}

/// Extract tasks in plan order. Returns an empty list when no header matches.
///
/// Duplicate ids are kept as separate tasks.
pub fn extract_tasks(plan: &str) -> Vec<Task> {
    let lines: Vec<&str> = plan.lines().collect();
    let mut headers = Vec::new();
    let mut boundaries = Vec::new();
    // Marker that opened the current fence; only the same marker closes it.
    let mut fence: Option<&str> = None;

    for (idx, line) in lines.iter().enumerate() {
        let marker = fence_marker(line);
        match (fence, marker) {
            (None, Some(open)) => {
                fence = Some(open);
                continue;
            }
            (Some(open), Some(close)) if open == close => {
                fence = None;
                continue;
            }
            (Some(_), _) => continue,
            (None, None) => {}
        }
        if let Some(caps) = TASK_HEADER_RE.captures(line) {
            let (Some(letter), Some(number), Some(title)) = (caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };
            let Some(letter) = letter.as_str().chars().next() else {
                continue;
            };
            headers.push(Header {
                line_idx: idx,
                letter,
                number: number.as_str(),
                title: title.as_str(),
            });
            boundaries.push(idx);
        } else if PHASE_HEADING_RE.is_match(line) {
            boundaries.push(idx);
        }
    }

    headers
        .iter()
        .map(|header| {
            let start = header.line_idx;
            let mut end = boundaries
                .iter()
                .copied()
                .find(|&b| b > start)
                .unwrap_or(lines.len());
            while end > start + 1 && lines[end - 1].trim().is_empty() {
                end -= 1;
            }
            let content = lines[start..end].join("\n");
            let estimated_tokens = estimate_tokens(&content);
            Task {
                id: format!("{}{}", header.letter, header.number),
                title: header.title.to_string(),
                content,
                phase_letter: header.letter,
                line_start: start + 1,
                line_end: end,
                estimated_tokens,
            }
        })
        .collect()
}

/// Token estimate for a span of text.
pub fn estimate_tokens(content: &str) -> usize {
    content.chars().count() / CHARS_PER_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    #[test]
    fn step_lines_never_become_tasks() {
        let plan = "# Plan\n\n### Task A1: Fix nav\nStep 1: do X\nStep 2: do Y\n";
        let tasks = extract_tasks(plan);
        assert_eq!(ids(&tasks), vec!["A1"]);
        assert_eq!(tasks[0].title, "Fix nav");
        assert!(tasks[0].content.contains("Step 1: do X"));
    }

    #[test]
    fn only_exact_level_three_headers_match() {
        let plan = "\
## Task A1: level two
#### Task A2: level four
1. Task A3: numbered
### Task a4: lowercase letter
### Task A5 missing colon
### Task AB6: two letters
### Task A7:
 ### Task A8: indented
### Task B9: real one
";
        let tasks = extract_tasks(plan);
        assert_eq!(ids(&tasks), vec!["B9"]);
    }

    #[test]
    fn content_stops_at_next_task_or_phase_heading() {
        let plan = "\
## Phase A: Setup
### Task A1: First
body one

### Task A2: Second
body two
## Phase B: Later
prose that belongs to no task
### Task B1: Third
body three
";
        let tasks = extract_tasks(plan);
        assert_eq!(ids(&tasks), vec!["A1", "A2", "B1"]);
        assert_eq!(tasks[0].content, "### Task A1: First\nbody one");
        assert_eq!((tasks[0].line_start, tasks[0].line_end), (2, 3));
        assert_eq!(tasks[1].content, "### Task A2: Second\nbody two");
        assert!(!tasks[1].content.contains("prose"));
        assert_eq!(tasks[2].content, "### Task B1: Third\nbody three");
        assert_eq!(tasks[2].phase_letter, 'B');
    }

    #[test]
    fn non_phase_level_two_heading_stays_in_body() {
        let plan = "### Task A1: First\n## Notes\nkeep me\n";
        let tasks = extract_tasks(plan);
        assert!(tasks[0].content.contains("keep me"));
    }

    #[test]
    fn headers_inside_code_fences_are_ignored() {
        let plan = "\
### Task A1: Document the format
```markdown
### Task A2: example header in docs
```
after fence
";
        let tasks = extract_tasks(plan);
        assert_eq!(ids(&tasks), vec!["A1"]);
        assert!(tasks[0].content.contains("after fence"));
    }

    #[test]
    fn other_fence_marker_does_not_close_fence() {
        let plan = "\
### Task A1: Document fences
```text
~~~
### Task A2: still inside the backtick fence
```
### Task A3: Real
";
        let tasks = extract_tasks(plan);
        assert_eq!(ids(&tasks), vec!["A1", "A3"]);
    }

    #[test]
    fn token_estimate_uses_chars_per_token() {
        let body = "x".repeat(400);
        let plan = format!("### Task A1: T\n{body}\n");
        let tasks = extract_tasks(&plan);
        let expected = tasks[0].content.chars().count() / CHARS_PER_TOKEN;
        assert_eq!(tasks[0].estimated_tokens, expected);
        assert!(tasks[0].estimated_tokens >= 100);
    }

    #[test]
    fn no_headers_yields_empty_list() {
        assert!(extract_tasks("# Plan\n\n1. do things\nStep 1: more\n").is_empty());
        assert!(extract_tasks("").is_empty());
    }

    #[test]
    fn duplicate_ids_are_kept_in_order() {
        let plan = "### Task A1: one\n### Task A1: two\n";
        let tasks = extract_tasks(plan);
        assert_eq!(ids(&tasks), vec!["A1", "A1"]);
        assert_eq!(tasks[1].title, "two");
    }

    #[test]
    fn handles_crlf_line_endings() {
        let plan = "### Task C12: Windows\r\nbody\r\n";
        let tasks = extract_tasks(plan);
        assert_eq!(ids(&tasks), vec!["C12"]);
        assert_eq!(tasks[0].title, "Windows");
    }
}
