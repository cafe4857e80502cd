//! Configuration loading and management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub webhooks: WebhookConfig,
}

/// HTTP server and storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Address the API binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the API listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required for write requests. Unset allows everything.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".flux/flux.db")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Webhook delivery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Per-attempt HTTP timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total attempts per delivery, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before each retry, indexed by the attempt that just failed.
    /// Attempts past the end reuse the last value.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Maximum bytes of response body kept on a delivery record.
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delays_ms: default_retry_delays_ms(),
            response_body_limit: default_response_body_limit(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![1_000, 5_000, 30_000]
}

fn default_response_body_limit() -> usize {
    1_000
}

fn default_user_agent() -> String {
    "Flux-Webhook/1.0".to_string()
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from an explicit path, or `.flux/config.yaml`, or
    /// `~/.flux/config.yaml`, falling back to defaults. Environment variables
    /// are applied last.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::candidate_paths()
                .into_iter()
                .find(|p| p.is_file())
                .map(Self::load)
                .transpose()?
                .unwrap_or_default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".flux/config.yaml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".flux").join("config.yaml"));
        }
        paths
    }

    /// Apply `FLUX_*` overrides using the given variable lookup.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = var("FLUX_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Some(port) = var("FLUX_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(key) = var("FLUX_API_KEY").filter(|k| !k.is_empty()) {
            self.server.api_key = Some(key);
        }

        if let Some(timeout) = var("FLUX_WEBHOOK_TIMEOUT_MS").and_then(|t| t.parse().ok()) {
            self.webhooks.timeout_ms = timeout;
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.webhooks.timeout(), Duration::from_secs(10));
        assert_eq!(config.webhooks.max_retries, 3);
        assert_eq!(
            config.webhooks.retry_delays(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(30)
            ]
        );
        assert_eq!(config.webhooks.response_body_limit, 1000);
        assert_eq!(config.webhooks.user_agent, "Flux-Webhook/1.0");
        assert!(config.server.api_key.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "webhooks:\n  timeout_ms: 2500\n  retry_delays_ms: [10, 20]\n",
        )
        .unwrap();
        assert_eq!(config.webhooks.timeout_ms, 2500);
        assert_eq!(config.webhooks.retry_delays_ms, vec![10, 20]);
        assert_eq!(config.webhooks.max_retries, 3);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FLUX_DB_PATH", "/tmp/x.db"),
            ("FLUX_PORT", "8080"),
            ("FLUX_API_KEY", "k"),
            ("FLUX_WEBHOOK_TIMEOUT_MS", "nope"),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.api_key.as_deref(), Some("k"));
        // Unparseable values are ignored
        assert_eq!(config.webhooks.timeout_ms, 10_000);
    }

    #[test]
    fn test_empty_api_key_ignored() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "FLUX_API_KEY").then(String::new));
        assert!(config.server.api_key.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 4100\n  api_key: abc\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.api_key.as_deref(), Some("abc"));
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_or_default(Some(&dir.path().join("absent.yaml"))).is_err());
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.db_path = dir.path().join("nested").join("flux.db");

        config.ensure_db_dir().unwrap();
        assert!(dir.path().join("nested").is_dir());
    }
}
