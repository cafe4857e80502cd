//! `ready` and `blocked` subcommands.

use crate::types::{BlockedTask, Task, priority_label};
use clap::Args;

/// Optional project scope for task listings.
#[derive(Args, Debug)]
pub struct ProjectArgs {
    /// Project id to restrict the listing to (default: all projects)
    pub project: Option<String>,
}

/// One line per task: `<id>  P<n>  [<status>]  <title>`.
pub fn format_ready(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "No ready tasks.\n".to_string();
    }
    let mut out = String::new();
    for task in tasks {
        out.push_str(&format!(
            "{}  {}  [{}]  {}\n",
            task.id,
            priority_label(task.priority),
            task.status,
            task.title
        ));
    }
    out
}

pub fn format_blocked(blocked: &[BlockedTask]) -> String {
    if blocked.is_empty() {
        return "No blocked tasks.\n".to_string();
    }
    let mut out = String::new();
    for BlockedTask { task, blocked_by } in blocked {
        out.push_str(&format!(
            "{}  {}  [{}]  {}\n    blocked by: {}\n",
            task.id,
            priority_label(task.priority),
            task.status,
            task.title,
            blocked_by.join(", ")
        ));
    }
    out
}
