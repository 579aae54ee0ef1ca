// SPDX-License-Identifier: MIT

//! Task selection.

use ralph_core::{Task, TaskStatus};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Pick the next task to run: highest priority among pending tasks not
/// in the skipped set, ties broken by id in lexicographic order.
pub fn select_next_task<'a>(tasks: &'a [Task], skipped: &HashSet<String>) -> Option<&'a Task> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && !skipped.contains(&t.id))
        .min_by(|a, b| selection_order(a, b))
}

/// Ordering where `Less` means "selected first". Absent priority sorts
/// below every explicit priority.
fn selection_order(a: &Task, b: &Task) -> Ordering {
    let pa = a.priority.unwrap_or(i64::MIN);
    let pb = b.priority.unwrap_or(i64::MIN);
    pb.cmp(&pa).then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
#[path = "select_tests.rs"]
mod tests;
