//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Prefix of every environment variable the service reads
pub const ENV_PREFIX: &str = "UPLOAD_RELAY";

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config = Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config.validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        Self::apply_env(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override `config` with the variables `lookup` resolves
    pub fn apply_env<F>(config: &mut Config, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name));

        if let Some(bind_addr) = var("BIND_ADDR") {
            config.server.bind_addr = bind_addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid {}_BIND_ADDR: {}", ENV_PREFIX, bind_addr))?;
        }

        if let Some(max_body) = var("MAX_BODY_SIZE") {
            config.server.max_body_size = max_body.parse::<usize>()
                .with_context(|| format!("Invalid {}_MAX_BODY_SIZE: {}", ENV_PREFIX, max_body))?;
        }

        if let Some(upstream) = var("UPSTREAM_URL") {
            config.relay.upstream_url = upstream;
        }

        if let Some(timeout) = var("REQUEST_TIMEOUT") {
            config.relay.request_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid {}_REQUEST_TIMEOUT: {}", ENV_PREFIX, timeout))?;
        }

        if let Some(auth_enabled) = var("AUTH_ENABLED") {
            config.auth.enabled = auth_enabled.parse::<bool>()
                .with_context(|| format!("Invalid {}_AUTH_ENABLED: {}", ENV_PREFIX, auth_enabled))?;
        }

        if let Some(uploads_dir) = var("UPLOADS_DIR") {
            config.storage.uploads_dir = PathBuf::from(uploads_dir);
        }

        if let Some(log_level) = var("LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        Ok(())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_auth_config()
            .with_context(|| "Authentication configuration validation failed")?;

        self.validate_storage_config()
            .with_context(|| "Storage configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_body_size == 0 {
            bail!("max_body_size must be greater than 0");
        }

        if self.server.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.relay.upstream_url)
            .with_context(|| format!("upstream_url is not a valid URL: {}", self.relay.upstream_url))?;

        if !["http", "https"].contains(&url.scheme()) {
            bail!("upstream_url must use http or https");
        }

        if self.relay.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_auth_config(&self) -> Result<()> {
        if self.auth.required_role.is_empty() {
            bail!("auth.required_role must not be empty");
        }

        if self.auth.max_token_age.is_zero() {
            bail!("auth.max_token_age must be greater than 0");
        }

        for (i, token) in self.auth.tokens.iter().enumerate() {
            if token.token.is_empty() {
                bail!("Token {} is empty", i);
            }

            if token.role.is_empty() {
                bail!("Token {} has empty role", i);
            }
        }

        if let Some(issuer_token) = &self.auth.issuer_token {
            if issuer_token.is_empty() {
                bail!("auth.issuer_token must not be empty when set");
            }
        }

        Ok(())
    }

    fn validate_storage_config(&self) -> Result<()> {
        if self.storage.uploads_dir.as_os_str().is_empty() {
            bail!("storage.uploads_dir must not be empty");
        }

        if self.storage.sink_file.as_os_str().is_empty() {
            bail!("storage.sink_file must not be empty");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        upstream: Option<&str>,
        no_auth: bool,
        timeout: Option<u64>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(upstream) = upstream {
            self.relay.upstream_url = upstream.to_string();
            tracing::info!("CLI override: upstream set to {}", upstream);
        }

        if no_auth {
            self.auth.enabled = false;
            tracing::info!("CLI override: authentication disabled");
        }

        if let Some(timeout_secs) = timeout {
            self.relay.request_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: request timeout set to {}s", timeout_secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
[server]
bind_addr = "0.0.0.0:9000"
max_body_size = 1048576
shutdown_timeout = "10s"

[relay]
upstream_url = "http://upstream.local/upload_stream"
request_timeout = "5m"

[auth]
enabled = true
required_role = "app_user"
max_token_age = "24h"
issuer_token = "issued"

[[auth.tokens]]
token = "secret-token"
role = "app_user"
issued_at = "2026-10-01T00:00:00Z"

[storage]
uploads_dir = "/tmp/uploads"
sink_file = "/tmp/out"

[monitoring]
log_level = "debug"
metrics_enabled = false
"#;

        let config = ConfigManager::parse(content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.relay.request_timeout, Duration::from_secs(300));
        assert_eq!(config.auth.tokens.len(), 1);
        assert_eq!(config.auth.tokens[0].role, "app_user");
        assert_eq!(config.auth.issuer_token.as_deref(), Some("issued"));
        assert!(!config.monitoring.metrics_enabled);
    }

    #[test]
    fn test_parse_partial_config_uses_defaults() {
        let content = r#"
[relay]
upstream_url = "http://upstream.local/upload_stream"

[auth]
enabled = false
"#;

        let config = ConfigManager::parse(content).unwrap();
        let defaults = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.relay.upstream_url, "http://upstream.local/upload_stream");
        assert_eq!(config.relay.request_timeout, defaults.relay.request_timeout);
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.required_role, defaults.auth.required_role);
        assert_eq!(config.server.bind_addr, defaults.server.bind_addr);
        assert_eq!(config.storage.uploads_dir, defaults.storage.uploads_dir);
        assert_eq!(config.monitoring.log_level, "info");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = ConfigManager::parse("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.max_body_size, Config::default().server.max_body_size);
    }

    #[test]
    fn test_invalid_upstream_rejected() {
        let mut config = Config::default();
        config.relay.upstream_url = "ftp://example.com/x".to_string();
        assert!(config.validate().is_err());

        config.relay.upstream_url = "nonsense".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.relay.request_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.monitoring.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<String, String> = [
            ("UPLOAD_RELAY_BIND_ADDR", "127.0.0.1:7000"),
            ("UPLOAD_RELAY_UPSTREAM_URL", "http://10.0.0.1/upload_stream"),
            ("UPLOAD_RELAY_REQUEST_TIMEOUT", "90s"),
            ("UPLOAD_RELAY_AUTH_ENABLED", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = Config::default();
        ConfigManager::apply_env(&mut config, |key| vars.get(key).cloned()).unwrap();

        assert_eq!(config.server.bind_addr.port(), 7000);
        assert_eq!(config.relay.upstream_url, "http://10.0.0.1/upload_stream");
        assert_eq!(config.relay.request_timeout, Duration::from_secs(90));
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = Config::default();
        let result = ConfigManager::apply_env(&mut config, |key| {
            (key == "UPLOAD_RELAY_AUTH_ENABLED").then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.merge_with_cli_args(
            Some("0.0.0.0:1234"),
            Some(4321),
            Some("http://other/upload_stream"),
            true,
            Some(60),
        );

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:4321");
        assert_eq!(config.relay.upstream_url, "http://other/upload_stream");
        assert!(!config.auth.enabled);
        assert_eq!(config.relay.request_timeout, Duration::from_secs(60));
    }
}
