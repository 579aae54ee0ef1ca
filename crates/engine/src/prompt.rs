// SPDX-License-Identifier: MIT

//! Prompt template rendering.
//!
//! The template language is deliberately tiny: `{task_id}`,
//! `{task_title}`, and `{task_description}` are substituted, everything
//! else passes through verbatim.

use ralph_core::Task;

/// Prompt used when no template is configured.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
Work on the following task until it is complete, then update the tracker.

Task {task_id}: {task_title}

{task_description}";

/// Render the prompt for one task.
pub fn render_prompt(template: &str, task: &Task) -> String {
    template
        .replace("{task_id}", &task.id)
        .replace("{task_title}", &task.title)
        .replace(
            "{task_description}",
            task.description.as_deref().unwrap_or(""),
        )
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
