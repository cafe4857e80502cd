//! Webhook registration.

use super::{Database, json_column, new_id};
use crate::error::FluxError;
use crate::types::{NewWebhook, Webhook, WebhookEventType, WebhookPatch, now_rfc3339};
use crate::webhooks::store::WebhookStore;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

fn parse_webhook_row(row: &Row) -> rusqlite::Result<Webhook> {
    let events_json: Option<String> = row.get("events")?;
    Ok(Webhook {
        id: row.get("id")?,
        name: row.get("name")?,
        url: row.get("url")?,
        secret: row.get("secret")?,
        events: json_column(events_json),
        project_id: row.get("project_id")?,
        enabled: row.get("enabled")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn get_webhook_internal(conn: &Connection, webhook_id: &str) -> Result<Option<Webhook>> {
    let webhook = conn
        .query_row(
            "SELECT * FROM webhooks WHERE id = ?1",
            params![webhook_id],
            parse_webhook_row,
        )
        .optional()?;
    Ok(webhook)
}

fn check_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(FluxError::invalid_value("url", "url must start with http:// or https://").into())
    }
}

impl Database {
    /// Register a webhook.
    pub fn create_webhook(&self, input: NewWebhook) -> Result<Webhook> {
        if input.name.trim().is_empty() {
            return Err(FluxError::missing_field("name").into());
        }
        check_url(&input.url)?;

        let now = now_rfc3339();
        let webhook = Webhook {
            id: new_id(),
            name: input.name,
            url: input.url,
            secret: input.secret.filter(|s| !s.is_empty()),
            events: input.events,
            project_id: input.project_id,
            enabled: input.enabled,
            created_at: now.clone(),
            updated_at: now,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO webhooks (id, name, url, secret, events, project_id, enabled,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    webhook.id,
                    webhook.name,
                    webhook.url,
                    webhook.secret,
                    serde_json::to_string(&webhook.events)?,
                    webhook.project_id,
                    webhook.enabled,
                    webhook.created_at,
                    webhook.updated_at,
                ],
            )?;
            Ok(())
        })?;

        Ok(webhook)
    }

    pub fn get_webhook(&self, webhook_id: &str) -> Result<Option<Webhook>> {
        self.with_conn(|conn| get_webhook_internal(conn, webhook_id))
    }

    pub fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM webhooks ORDER BY created_at, id")?;
            let webhooks = stmt
                .query_map([], parse_webhook_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(webhooks)
        })
    }

    pub fn update_webhook(&self, webhook_id: &str, patch: &WebhookPatch) -> Result<Webhook> {
        if let Some(ref url) = patch.url {
            check_url(url)?;
        }

        self.with_conn(|conn| {
            let mut webhook = get_webhook_internal(conn, webhook_id)?
                .ok_or_else(|| FluxError::webhook_not_found(webhook_id))?;

            if let Some(ref name) = patch.name {
                webhook.name = name.clone();
            }
            if let Some(ref url) = patch.url {
                webhook.url = url.clone();
            }
            if let Some(ref secret) = patch.secret {
                // An empty secret turns signing off
                webhook.secret = Some(secret.clone()).filter(|s| !s.is_empty());
            }
            if let Some(ref events) = patch.events {
                webhook.events = events.clone();
            }
            if let Some(ref project_id) = patch.project_id {
                webhook.project_id = Some(project_id.clone()).filter(|p| !p.is_empty());
            }
            if let Some(enabled) = patch.enabled {
                webhook.enabled = enabled;
            }
            webhook.updated_at = now_rfc3339();

            conn.execute(
                "UPDATE webhooks SET name = ?2, url = ?3, secret = ?4, events = ?5,
                        project_id = ?6, enabled = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    webhook.id,
                    webhook.name,
                    webhook.url,
                    webhook.secret,
                    serde_json::to_string(&webhook.events)?,
                    webhook.project_id,
                    webhook.enabled,
                    webhook.updated_at,
                ],
            )?;

            Ok(webhook)
        })
    }

    /// Delete a webhook. Its delivery records stay in the ledger.
    pub fn delete_webhook(&self, webhook_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM webhooks WHERE id = ?1", params![webhook_id])?;
            if deleted == 0 {
                return Err(FluxError::webhook_not_found(webhook_id).into());
            }
            Ok(())
        })
    }
}

impl WebhookStore for Database {
    fn find_webhook(&self, webhook_id: &str) -> Result<Option<Webhook>> {
        self.get_webhook(webhook_id)
    }

    fn webhooks_for_event(
        &self,
        event: WebhookEventType,
        project_id: Option<&str>,
    ) -> Result<Vec<Webhook>> {
        let webhooks = self.list_webhooks()?;
        Ok(webhooks
            .into_iter()
            .filter(|w| w.wants(event, project_id))
            .collect())
    }
}
