//! Flux
//!
//! Project and task tracking with signed, retrying webhook delivery.

use anyhow::Result;
use clap::Parser;
use flux_tracker::cli::webhook::{DeliveriesArgs, WebhookCommand, format_deliveries, format_outcome};
use flux_tracker::cli::{Cli, Command, tasks};
use flux_tracker::config::Config;
use flux_tracker::db::Database;
use flux_tracker::logging::{self, LogTarget};
use flux_tracker::server::{AppState, start_server};
use flux_tracker::webhooks::{DeliveryEngine, DeliverySettings, WebhookDispatcher};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.clone();
    }

    match cli.command {
        Some(Command::Ready(args)) => {
            let db = open_database(&config)?;
            let ready = db.ready_tasks(args.project.as_deref())?;
            print_output(cli.json, &ready, || tasks::format_ready(&ready))?;
        }
        Some(Command::Blocked(args)) => {
            let db = open_database(&config)?;
            let blocked = db.blocked_tasks(args.project.as_deref())?;
            print_output(cli.json, &blocked, || tasks::format_blocked(&blocked))?;
        }
        Some(Command::Webhook(WebhookCommand::Test { id })) => {
            let db = open_database(&config)?;
            let dispatcher = build_dispatcher(db, &config);
            let outcome = dispatcher.test_webhook(&id).await?;
            print_output(cli.json, &outcome, || format_outcome(&outcome))?;
        }
        Some(Command::Deliveries(DeliveriesArgs { webhook, limit })) => {
            let db = open_database(&config)?;
            let dispatcher = build_dispatcher(db, &config);
            let deliveries = dispatcher.get_recent_deliveries(webhook.as_deref(), limit)?;
            print_output(cli.json, &deliveries, || format_deliveries(&deliveries))?;
        }
        Some(Command::Serve { port }) => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await?;
        }
        None => run_server(config).await?,
    }

    Ok(())
}

fn open_database(config: &Config) -> Result<Arc<Database>> {
    config.ensure_db_dir()?;
    Ok(Arc::new(Database::open(&config.server.db_path)?))
}

fn build_dispatcher(db: Arc<Database>, config: &Config) -> WebhookDispatcher {
    let settings = DeliverySettings::from_config(&config.webhooks);
    let engine = Arc::new(DeliveryEngine::with_reqwest(db.clone(), settings));
    WebhookDispatcher::new(engine, db.clone(), db)
}

fn print_output<T, F>(json: bool, value: &T, text: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce() -> String,
{
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let db = open_database(&config)?;
    let dispatcher = build_dispatcher(db.clone(), &config);
    let state = AppState::new(db, dispatcher, config.server.api_key.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let (shutdown_tx, bound) = start_server(state, addr).await?;
    info!(
        db_path = %config.server.db_path.display(),
        auth = config.server.api_key.is_some(),
        "Flux listening on http://{}",
        bound
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    Ok(())
}
