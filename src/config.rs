//! Relay configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::types::{RelayError, DEFAULT_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
}

/// Listener and timing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long the pairing loop waits for a connection. A lone pending
    /// companion is expired once a wait elapses with nothing accepted.
    pub accept_timeout_ms: u64,
    /// Readiness poll bound for each relay cycle.
    pub poll_timeout_ms: u64,
    /// Listen backlog.
    pub max_pending: u32,
}

impl ServerConfig {
    /// Host and port as `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// How long an unpaired companion may wait.
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    /// Readiness poll bound for session workers.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            accept_timeout_ms: 8000,
            poll_timeout_ms: 1000,
            max_pending: 32,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level or filter directive, e.g. "info" or "pairchat=debug".
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Load configuration from an optional TOML file, overridden by
/// `PAIRCHAT__SECTION__KEY` environment variables.
pub fn load_config(path: Option<&str>) -> Result<RelayConfig, RelayError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("PAIRCHAT")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build()?.try_deserialize()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn parse(toml: &str) -> RelayConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("");
        assert_eq!(config.server.bind_addr(), "127.0.0.1:3848");
        assert_eq!(config.server.accept_timeout(), Duration::from_secs(8));
        assert_eq!(config.server.max_pending, 32);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Plain);
    }

    #[test]
    fn test_partial_override() {
        let config = parse(
            r#"
            [server]
            port = 4000
            poll_timeout_ms = 250

            [log]
            format = "json"
            "#,
        );
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.poll_timeout(), Duration::from_millis(250));
        assert_eq!(config.log.format, LogFormat::Json);
    }
}
