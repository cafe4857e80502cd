//! Project and epic operations.

use super::{Database, new_id};
use crate::error::FluxError;
use crate::types::{Epic, Project, TaskStatus, now_rfc3339};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

fn parse_project_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_epic_row(row: &Row) -> rusqlite::Result<Epic> {
    let status: String = row.get("status")?;
    Ok(Epic {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        status: TaskStatus::from_str(&status).unwrap_or_default(),
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn project_exists(conn: &Connection, project_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM projects WHERE id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn epic_exists(conn: &Connection, epic_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM epics WHERE id = ?1", params![epic_id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

impl Database {
    /// Create a new project.
    pub fn create_project(&self, name: &str, description: Option<&str>) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(FluxError::missing_field("name").into());
        }

        let project = Project {
            id: new_id(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now_rfc3339(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    project.id,
                    project.name,
                    project.description,
                    project.created_at
                ],
            )?;
            Ok(())
        })?;

        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        self.with_conn(|conn| {
            let project = conn
                .query_row(
                    "SELECT * FROM projects WHERE id = ?1",
                    params![project_id],
                    parse_project_row,
                )
                .optional()?;
            Ok(project)
        })
    }

    /// List projects in creation order.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM projects ORDER BY created_at, id")?;
            let projects = stmt
                .query_map([], parse_project_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(projects)
        })
    }

    /// Create an epic inside a project.
    pub fn create_epic(&self, project_id: &str, title: &str) -> Result<Epic> {
        if title.trim().is_empty() {
            return Err(FluxError::missing_field("title").into());
        }

        self.with_conn(|conn| {
            if !project_exists(conn, project_id)? {
                return Err(FluxError::project_not_found(project_id).into());
            }

            let epic = Epic {
                id: new_id(),
                project_id: project_id.to_string(),
                title: title.to_string(),
                status: TaskStatus::Todo,
                created_at: now_rfc3339(),
            };

            conn.execute(
                "INSERT INTO epics (id, project_id, title, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    epic.id,
                    epic.project_id,
                    epic.title,
                    epic.status.as_str(),
                    epic.created_at
                ],
            )?;

            Ok(epic)
        })
    }

    pub fn list_epics(&self, project_id: &str) -> Result<Vec<Epic>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM epics WHERE project_id = ?1 ORDER BY created_at, id")?;
            let epics = stmt
                .query_map(params![project_id], parse_epic_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(epics)
        })
    }
}
