//! Flux task tracker library
//!
//! Task graph evaluation, webhook delivery and the HTTP API, exported for
//! the `flux` binary and for integration tests.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod logging;
pub mod server;
pub mod types;
pub mod webhooks;
