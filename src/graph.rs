//! Readiness evaluation over a task snapshot.
//!
//! Blocking is a one-hop check: a task is blocked when any task it depends
//! on exists and is not done. Nothing here walks the graph transitively, so
//! cyclic `depends_on` chains cannot cause non-termination. Dependency ids
//! that resolve to no task are ignored.

use crate::types::{Task, TaskStatus};
use std::collections::HashMap;

/// Index a snapshot by task id.
pub fn index_tasks(tasks: &[Task]) -> HashMap<&str, &Task> {
    tasks.iter().map(|t| (t.id.as_str(), t)).collect()
}

/// Ids in `task.depends_on` that resolve to a task that is not done.
/// Order follows `depends_on`; duplicates are reported once.
pub fn blockers_of<'a>(task: &'a Task, all_tasks_by_id: &HashMap<&str, &Task>) -> Vec<&'a str> {
    let mut blockers: Vec<&str> = Vec::new();
    for dep_id in &task.depends_on {
        let unmet = all_tasks_by_id
            .get(dep_id.as_str())
            .is_some_and(|dep| dep.status != TaskStatus::Done);
        if unmet && !blockers.contains(&dep_id.as_str()) {
            blockers.push(dep_id.as_str());
        }
    }
    blockers
}

/// A task is blocked iff at least one dependency resolves to a task whose
/// status is not `done`.
pub fn is_blocked(task: &Task, all_tasks_by_id: &HashMap<&str, &Task>) -> bool {
    task.depends_on.iter().any(|dep_id| {
        all_tasks_by_id
            .get(dep_id.as_str())
            .is_some_and(|dep| dep.status != TaskStatus::Done)
    })
}

fn in_scope(task: &Task, project_id: Option<&str>) -> bool {
    project_id.is_none_or(|pid| task.project_id == pid)
}

/// Tasks that are not done, not archived, and not blocked, optionally limited
/// to one project.
///
/// Sorted ascending by priority with unset treated as P2. The sort is stable,
/// so equal priorities keep their input order.
pub fn get_ready_tasks(project_id: Option<&str>, all_tasks: &[Task]) -> Vec<Task> {
    let by_id = index_tasks(all_tasks);

    let mut ready: Vec<Task> = all_tasks
        .iter()
        .filter(|t| in_scope(t, project_id))
        .filter(|t| t.status != TaskStatus::Done && !t.archived)
        .filter(|t| !is_blocked(t, &by_id))
        .cloned()
        .collect();

    ready.sort_by_key(Task::effective_priority);
    ready
}

/// Tasks that are not done, not archived, and blocked, in input order, each
/// paired with the ids blocking it.
pub fn get_blocked_tasks(project_id: Option<&str>, all_tasks: &[Task]) -> Vec<(Task, Vec<String>)> {
    let by_id = index_tasks(all_tasks);

    all_tasks
        .iter()
        .filter(|t| in_scope(t, project_id))
        .filter(|t| t.status != TaskStatus::Done && !t.archived)
        .filter_map(|t| {
            let blockers = blockers_of(t, &by_id);
            if blockers.is_empty() {
                None
            } else {
                let ids = blockers.into_iter().map(str::to_string).collect();
                Some((t.clone(), ids))
            }
        })
        .collect()
}
