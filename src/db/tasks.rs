//! Task CRUD and readiness queries.

use super::projects::{epic_exists, project_exists};
use super::{Database, json_column, new_id};
use crate::error::FluxError;
use crate::graph;
use crate::types::{
    BlockedTask, Comment, CommentAuthor, NewTask, PRIORITY_LOW, Priority, Task, TaskPatch,
    TaskStatus, now_rfc3339,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let priority: Option<i64> = row.get("priority")?;
    let depends_on_json: Option<String> = row.get("depends_on")?;
    let comments_json: Option<String> = row.get("comments")?;

    Ok(Task {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        epic_id: row.get("epic_id")?,
        title: row.get("title")?,
        notes: row.get("notes")?,
        status: TaskStatus::from_str(&status).unwrap_or_default(),
        priority: priority.and_then(|p| Priority::try_from(p).ok()),
        depends_on: json_column(depends_on_json),
        archived: row.get("archived")?,
        comments: json_column(comments_json),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn check_priority(priority: Option<Priority>) -> Result<()> {
    match priority {
        Some(p) if p > PRIORITY_LOW => {
            Err(FluxError::invalid_value("priority", "priority must be 0, 1 or 2").into())
        }
        _ => Ok(()),
    }
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE id = ?1",
            params![task_id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

fn write_task(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET epic_id = ?2, title = ?3, notes = ?4, status = ?5, priority = ?6,
                depends_on = ?7, archived = ?8, comments = ?9, updated_at = ?10
         WHERE id = ?1",
        params![
            task.id,
            task.epic_id,
            task.title,
            task.notes,
            task.status.as_str(),
            task.priority,
            serde_json::to_string(&task.depends_on)?,
            task.archived,
            serde_json::to_string(&task.comments)?,
            task.updated_at,
        ],
    )?;
    Ok(())
}

impl Database {
    /// Create a task in a project.
    pub fn create_task(&self, project_id: &str, input: NewTask) -> Result<Task> {
        if input.title.trim().is_empty() {
            return Err(FluxError::missing_field("title").into());
        }
        check_priority(input.priority)?;

        self.with_conn(|conn| {
            if !project_exists(conn, project_id)? {
                return Err(FluxError::project_not_found(project_id).into());
            }
            if let Some(ref epic_id) = input.epic_id {
                if !epic_exists(conn, epic_id)? {
                    return Err(FluxError::epic_not_found(epic_id).into());
                }
            }

            let now = now_rfc3339();
            let task = Task {
                id: new_id(),
                project_id: project_id.to_string(),
                epic_id: input.epic_id,
                title: input.title,
                notes: input.notes,
                status: input.status.unwrap_or_default(),
                priority: input.priority,
                depends_on: input.depends_on,
                archived: false,
                comments: vec![],
                created_at: now.clone(),
                updated_at: now,
            };

            conn.execute(
                "INSERT INTO tasks (id, project_id, epic_id, title, notes, status, priority,
                                    depends_on, archived, comments, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, '[]', ?9, ?10)",
                params![
                    task.id,
                    task.project_id,
                    task.epic_id,
                    task.title,
                    task.notes,
                    task.status.as_str(),
                    task.priority,
                    serde_json::to_string(&task.depends_on)?,
                    task.created_at,
                    task.updated_at,
                ],
            )?;

            Ok(task)
        })
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Snapshot of tasks in creation order, optionally for one project.
    pub fn list_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let tasks = match project_id {
                Some(pid) => {
                    let mut stmt =
                        conn.prepare("SELECT * FROM tasks WHERE project_id = ?1 ORDER BY seq")?;
                    stmt.query_map(params![pid], parse_task_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY seq")?;
                    stmt.query_map([], parse_task_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(tasks)
        })
    }

    /// Apply a partial update. Returns the task before and after the change.
    pub fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<(Task, Task)> {
        check_priority(patch.priority)?;

        self.with_conn(|conn| {
            let before = get_task_internal(conn, task_id)?
                .ok_or_else(|| FluxError::task_not_found(task_id))?;

            if let Some(ref epic_id) = patch.epic_id {
                if !epic_exists(conn, epic_id)? {
                    return Err(FluxError::epic_not_found(epic_id).into());
                }
            }

            let mut task = before.clone();
            if let Some(ref title) = patch.title {
                if title.trim().is_empty() {
                    return Err(FluxError::invalid_value("title", "title cannot be empty").into());
                }
                task.title = title.clone();
            }
            if let Some(ref notes) = patch.notes {
                task.notes = Some(notes.clone());
            }
            if let Some(status) = patch.status {
                task.status = status;
            }
            if let Some(priority) = patch.priority {
                task.priority = Some(priority);
            }
            if let Some(ref epic_id) = patch.epic_id {
                task.epic_id = Some(epic_id.clone());
            }
            if let Some(ref depends_on) = patch.depends_on {
                task.depends_on = depends_on.clone();
            }
            if let Some(archived) = patch.archived {
                task.archived = archived;
            }
            task.updated_at = now_rfc3339();

            write_task(conn, &task)?;
            Ok((before, task))
        })
    }

    /// Delete a task. Other tasks keep any `depends_on` references to it.
    pub fn delete_task(&self, task_id: &str) -> Result<Task> {
        self.with_conn(|conn| {
            let task = get_task_internal(conn, task_id)?
                .ok_or_else(|| FluxError::task_not_found(task_id))?;
            conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            Ok(task)
        })
    }

    /// Append a comment to a task.
    pub fn add_comment(&self, task_id: &str, body: &str, author: CommentAuthor) -> Result<Task> {
        if body.trim().is_empty() {
            return Err(FluxError::missing_field("body").into());
        }

        self.with_conn(|conn| {
            let mut task = get_task_internal(conn, task_id)?
                .ok_or_else(|| FluxError::task_not_found(task_id))?;

            let now = now_rfc3339();
            task.comments.push(Comment {
                id: new_id(),
                body: body.to_string(),
                author,
                created_at: now.clone(),
            });
            task.updated_at = now;

            write_task(conn, &task)?;
            Ok(task)
        })
    }

    /// Ready tasks evaluated against the full snapshot, since dependencies
    /// may cross projects.
    pub fn ready_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>> {
        let snapshot = self.list_tasks(None)?;
        Ok(graph::get_ready_tasks(project_id, &snapshot))
    }

    /// Blocked tasks with the ids blocking each.
    pub fn blocked_tasks(&self, project_id: Option<&str>) -> Result<Vec<BlockedTask>> {
        let snapshot = self.list_tasks(None)?;
        Ok(graph::get_blocked_tasks(project_id, &snapshot)
            .into_iter()
            .map(|(task, blocked_by)| BlockedTask { task, blocked_by })
            .collect())
    }
}
