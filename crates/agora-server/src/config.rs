//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development. AI routing lives in a separate YAML
//! file (see `agora_ai::config`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agora_shared::constants::{
    DEFAULT_CHANNEL_COOLDOWN_MS, DEFAULT_HTTP_PORT, DEFAULT_MAX_ATTACHMENT_SIZE,
    DEFAULT_MAX_CONCURRENT_DELIVERIES, DEFAULT_REMINDER_CHECK_INTERVAL_SECS,
    DEFAULT_REMINDER_LOOKAHEAD_HOURS,
};

#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: the platform data directory.
    pub database_path: Option<PathBuf>,

    /// AI routing file. A missing file disables AI features.
    /// Env: `AI_CONFIG_PATH`
    /// Default: `config.yaml`
    pub ai_config_path: PathBuf,

    /// Directory where downloaded attachments are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./data/files`
    pub blob_storage_path: PathBuf,

    /// Attachments larger than this are skipped.
    /// Env: `MAX_ATTACHMENT_SIZE` (bytes)
    pub max_attachment_size: usize,

    /// Bearer token the gateway must present. `None` disables the check.
    /// Env: `GATEWAY_TOKEN`
    pub gateway_token: Option<String>,

    /// Gateway endpoint that renders outbound notifications. `None` logs them.
    /// Env: `OUTBOUND_WEBHOOK_URL`
    pub outbound_webhook_url: Option<String>,

    // -- Fan-out --
    /// Env: `FANOUT_MAX_CONCURRENCY`
    pub fanout_max_concurrency: usize,

    /// Env: `FANOUT_COOLDOWN_MS`
    pub fanout_cooldown: Duration,

    /// Attach similar past messages to fan-out notifications.
    /// Env: `FANOUT_FIND_SIMILAR` (true/false)
    pub fanout_find_similar: bool,

    // -- Reminders --
    /// Env: `REMINDER_CHECK_INTERVAL_SECS`
    pub reminder_check_interval: Duration,

    /// Env: `REMINDER_LOOKAHEAD_HOURS`
    pub reminder_lookahead_hours: i64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("ai_config_path", &self.ai_config_path)
            .field("blob_storage_path", &self.blob_storage_path)
            .field("max_attachment_size", &self.max_attachment_size)
            .field("gateway_token", &self.gateway_token.as_ref().map(|_| "<redacted>"))
            .field("outbound_webhook_url", &self.outbound_webhook_url)
            .field("fanout_max_concurrency", &self.fanout_max_concurrency)
            .field("fanout_cooldown", &self.fanout_cooldown)
            .field("fanout_find_similar", &self.fanout_find_similar)
            .field("reminder_check_interval", &self.reminder_check_interval)
            .field("reminder_lookahead_hours", &self.reminder_lookahead_hours)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            ai_config_path: PathBuf::from("config.yaml"),
            blob_storage_path: PathBuf::from("./data/files"),
            max_attachment_size: DEFAULT_MAX_ATTACHMENT_SIZE,
            gateway_token: None,
            outbound_webhook_url: None,
            fanout_max_concurrency: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            fanout_cooldown: Duration::from_millis(DEFAULT_CHANNEL_COOLDOWN_MS),
            fanout_find_similar: false,
            reminder_check_interval: Duration::from_secs(DEFAULT_REMINDER_CHECK_INTERVAL_SECS),
            reminder_lookahead_hours: DEFAULT_REMINDER_LOOKAHEAD_HOURS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        if let Some(path) = non_empty(lookup("DATABASE_PATH")) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(path) = non_empty(lookup("AI_CONFIG_PATH")) {
            config.ai_config_path = PathBuf::from(path);
        }

        if let Some(path) = non_empty(lookup("BLOB_STORAGE_PATH")) {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_ATTACHMENT_SIZE") {
            parse_into(&mut config.max_attachment_size, "MAX_ATTACHMENT_SIZE", &val);
        }

        config.gateway_token = non_empty(lookup("GATEWAY_TOKEN"));
        config.outbound_webhook_url = non_empty(lookup("OUTBOUND_WEBHOOK_URL"));

        if let Some(val) = lookup("FANOUT_MAX_CONCURRENCY") {
            parse_into(&mut config.fanout_max_concurrency, "FANOUT_MAX_CONCURRENCY", &val);
            if config.fanout_max_concurrency == 0 {
                tracing::warn!("FANOUT_MAX_CONCURRENCY must be at least 1, using 1");
                config.fanout_max_concurrency = 1;
            }
        }

        if let Some(val) = lookup("FANOUT_COOLDOWN_MS") {
            let mut ms = DEFAULT_CHANNEL_COOLDOWN_MS;
            parse_into(&mut ms, "FANOUT_COOLDOWN_MS", &val);
            config.fanout_cooldown = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("FANOUT_FIND_SIMILAR") {
            config.fanout_find_similar = val == "true" || val == "1";
        }

        if let Some(val) = lookup("REMINDER_CHECK_INTERVAL_SECS") {
            let mut secs = DEFAULT_REMINDER_CHECK_INTERVAL_SECS;
            parse_into(&mut secs, "REMINDER_CHECK_INTERVAL_SECS", &val);
            if secs == 0 {
                tracing::warn!("REMINDER_CHECK_INTERVAL_SECS must be positive, using default");
                secs = DEFAULT_REMINDER_CHECK_INTERVAL_SECS;
            }
            config.reminder_check_interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("REMINDER_LOOKAHEAD_HOURS") {
            parse_into(&mut config.reminder_lookahead_hours, "REMINDER_LOOKAHEAD_HOURS", &val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Overwrite `slot` with the parsed value, or keep it and warn.
fn parse_into<T: FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.fanout_max_concurrency, 5);
        assert_eq!(config.fanout_cooldown, Duration::from_secs(1));
        assert_eq!(config.reminder_check_interval, Duration::from_secs(300));
        assert_eq!(config.reminder_lookahead_hours, 24);
        assert!(config.gateway_token.is_none());
    }

    #[test]
    fn overrides_from_lookup() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("GATEWAY_TOKEN", "secret"),
            ("FANOUT_MAX_CONCURRENCY", "2"),
            ("FANOUT_COOLDOWN_MS", "250"),
            ("FANOUT_FIND_SIMILAR", "true"),
            ("REMINDER_LOOKAHEAD_HOURS", "48"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.gateway_token.as_deref(), Some("secret"));
        assert_eq!(config.fanout_max_concurrency, 2);
        assert_eq!(config.fanout_cooldown, Duration::from_millis(250));
        assert!(config.fanout_find_similar);
        assert_eq!(config.reminder_lookahead_hours, 48);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("FANOUT_MAX_CONCURRENCY", "0"),
            ("FANOUT_COOLDOWN_MS", "soon"),
            ("REMINDER_CHECK_INTERVAL_SECS", "0"),
            ("GATEWAY_TOKEN", "  "),
        ]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.fanout_max_concurrency, 1);
        assert_eq!(config.fanout_cooldown, Duration::from_secs(1));
        assert_eq!(config.reminder_check_interval, Duration::from_secs(300));
        assert!(config.gateway_token.is_none());
    }

    #[test]
    fn debug_redacts_token() {
        let config = from_pairs(&[("GATEWAY_TOKEN", "secret")]);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
