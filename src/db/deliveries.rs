//! Webhook delivery ledger.

use super::Database;
use crate::error::FluxError;
use crate::types::{
    DeliveryStatus, DeliveryUpdate, WebhookDelivery, WebhookEventType, WebhookPayload,
    now_rfc3339,
};
use crate::webhooks::store::DeliveryStore;
use anyhow::{Result, anyhow};
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

pub fn parse_delivery_row(row: &Row) -> rusqlite::Result<WebhookDelivery> {
    let event: String = row.get("event")?;
    let status: String = row.get("status")?;
    let attempts: i64 = row.get("attempts")?;
    let response_code: Option<i64> = row.get("response_code")?;

    Ok(WebhookDelivery {
        id: row.get("id")?,
        webhook_id: row.get("webhook_id")?,
        event: WebhookEventType::from_str(&event).unwrap_or(WebhookEventType::TaskUpdated),
        payload: row.get("payload")?,
        status: DeliveryStatus::from_str(&status).unwrap_or(DeliveryStatus::Failed),
        attempts: u32::try_from(attempts).unwrap_or_default(),
        response_code: response_code.and_then(|c| u16::try_from(c).ok()),
        response_body: row.get("response_body")?,
        error: row.get("error")?,
        created_at: row.get("created_at")?,
        delivered_at: row.get("delivered_at")?,
    })
}

fn optional_text(value: &Option<String>) -> SqlValue {
    match value {
        Some(s) => SqlValue::Text(s.clone()),
        None => SqlValue::Null,
    }
}

impl DeliveryStore for Database {
    fn create_delivery(
        &self,
        webhook_id: &str,
        event: WebhookEventType,
        payload: &WebhookPayload,
    ) -> Result<WebhookDelivery> {
        let delivery = WebhookDelivery {
            id: payload.webhook_id.clone(),
            webhook_id: webhook_id.to_string(),
            event,
            payload: serde_json::to_string(payload)?,
            status: DeliveryStatus::Pending,
            attempts: 0,
            response_code: None,
            response_body: None,
            error: None,
            created_at: now_rfc3339(),
            delivered_at: None,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO webhook_deliveries (id, webhook_id, event, payload, status, attempts,
                                                 created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5)",
                params![
                    delivery.id,
                    delivery.webhook_id,
                    delivery.event.as_str(),
                    delivery.payload,
                    delivery.created_at,
                ],
            )
            .map_err(|e| anyhow!("failed to create delivery {}: {}", delivery.id, e))?;
            Ok(())
        })?;

        Ok(delivery)
    }

    fn update_delivery(&self, delivery_id: &str, update: &DeliveryUpdate) -> Result<()> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(status) = update.status {
            // Terminal statuses are final
            sets.push("status = CASE WHEN status = 'pending' THEN ? ELSE status END");
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(attempts) = update.attempts {
            sets.push("attempts = MAX(attempts, ?)");
            values.push(SqlValue::Integer(i64::from(attempts)));
        }
        if let Some(code) = update.response_code {
            sets.push("response_code = ?");
            values.push(code.map_or(SqlValue::Null, |c| SqlValue::Integer(i64::from(c))));
        }
        if let Some(ref body) = update.response_body {
            sets.push("response_body = ?");
            values.push(optional_text(body));
        }
        if let Some(ref error) = update.error {
            sets.push("error = ?");
            values.push(optional_text(error));
        }
        if let Some(ref delivered_at) = update.delivered_at {
            sets.push("delivered_at = ?");
            values.push(SqlValue::Text(delivered_at.clone()));
        }

        self.with_conn(|conn| {
            let changed = if sets.is_empty() {
                conn.query_row(
                    "SELECT COUNT(*) FROM webhook_deliveries WHERE id = ?1",
                    params![delivery_id],
                    |row| row.get::<_, i64>(0),
                )? as usize
            } else {
                let sql = format!(
                    "UPDATE webhook_deliveries SET {} WHERE id = ?",
                    sets.join(", ")
                );
                values.push(SqlValue::Text(delivery_id.to_string()));
                conn.execute(&sql, params_from_iter(values.iter()))?
            };

            if changed == 0 {
                return Err(FluxError::delivery_not_found(delivery_id).into());
            }
            Ok(())
        })
    }

    fn get_delivery(&self, delivery_id: &str) -> Result<Option<WebhookDelivery>> {
        self.with_conn(|conn| {
            let delivery = conn
                .query_row(
                    "SELECT * FROM webhook_deliveries WHERE id = ?1",
                    params![delivery_id],
                    parse_delivery_row,
                )
                .optional()?;
            Ok(delivery)
        })
    }

    fn list_deliveries(
        &self,
        webhook_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let deliveries = match webhook_id {
                Some(wid) => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM webhook_deliveries WHERE webhook_id = ?1
                         ORDER BY seq DESC LIMIT ?2",
                    )?;
                    stmt.query_map(params![wid, limit], parse_delivery_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT * FROM webhook_deliveries ORDER BY seq DESC LIMIT ?1")?;
                    stmt.query_map(params![limit], parse_delivery_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(deliveries)
        })
    }
}
