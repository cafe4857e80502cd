//! `webhook` and `deliveries` subcommands.

use crate::types::{DeliveryOutcome, WebhookDelivery};
use clap::{Args, Subcommand};

/// Webhook subcommands
#[derive(Subcommand, Debug)]
pub enum WebhookCommand {
    /// Send a single test delivery to a registered webhook
    Test {
        /// Webhook id
        id: String,
    },
}

/// Arguments for the deliveries subcommand
#[derive(Args, Debug)]
pub struct DeliveriesArgs {
    /// Only show deliveries for this webhook
    #[arg(short, long, value_name = "ID")]
    pub webhook: Option<String>,

    /// Maximum number of deliveries to show (default: 50)
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

pub fn format_outcome(outcome: &DeliveryOutcome) -> String {
    let status = outcome
        .status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());
    if outcome.success {
        format!("OK  HTTP {}\n", status)
    } else {
        format!(
            "FAILED  HTTP {}  {}\n",
            status,
            outcome.error.as_deref().unwrap_or("")
        )
    }
}

/// One line per delivery, newest first as given.
pub fn format_deliveries(deliveries: &[WebhookDelivery]) -> String {
    if deliveries.is_empty() {
        return "No deliveries.\n".to_string();
    }
    let mut out = String::new();
    for d in deliveries {
        let code = d
            .response_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{}  {}  {}  attempts={}  code={}  {}\n",
            d.id,
            d.event,
            d.status.as_str(),
            d.attempts,
            code,
            d.created_at
        ));
        if let Some(error) = &d.error {
            out.push_str(&format!("    error: {}\n", error));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeliveryStatus, WebhookEventType};

    #[test]
    fn test_format_outcome() {
        let ok = DeliveryOutcome {
            success: true,
            status_code: Some(200),
            body: Some("ok".to_string()),
            error: None,
        };
        assert_eq!(format_outcome(&ok), "OK  HTTP 200\n");

        let failed = DeliveryOutcome::failure("connection refused");
        assert_eq!(format_outcome(&failed), "FAILED  HTTP -  connection refused\n");
    }

    #[test]
    fn test_format_deliveries_includes_error() {
        let delivery = WebhookDelivery {
            id: "d1".to_string(),
            webhook_id: "wh".to_string(),
            event: WebhookEventType::TaskCreated,
            payload: "{}".to_string(),
            status: DeliveryStatus::Failed,
            attempts: 3,
            response_code: Some(500),
            response_body: None,
            error: Some("HTTP 500".to_string()),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            delivered_at: None,
        };
        assert_eq!(
            format_deliveries(&[delivery]),
            concat!(
                "d1  task.created  failed  attempts=3  code=500  2026-01-01T00:00:00.000Z\n",
                "    error: HTTP 500\n",
            )
        );
    }
}
