use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Client configuration. Loaded from an optional JSON file under the
/// user config dir, then overridden by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer credential obtained out of band (OAuth exchange is an
    /// external collaborator).
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Seconds without any stream frame before the connection is
    /// treated as stalled.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// Consecutive one-shot failures before the circuit opens.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_stall_timeout_secs() -> u64 {
    90
}

fn default_operation_timeout_secs() -> u64 {
    300
}

fn default_max_failures() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            bearer_token: None,
            poll_interval_ms: default_poll_interval_ms(),
            stall_timeout_secs: default_stall_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            max_failures: default_max_failures(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("finquery").join("config.json"))
    }

    /// Load the config file if present, then apply env overrides
    /// (`FINQUERY_BASE_URL`, `FINQUERY_TOKEN`).
    pub async fn load() -> Result<Self> {
        let mut config = match Self::config_file_path() {
            Some(path) if path.exists() => {
                let raw = tokio::fs::read_to_string(&path).await?;
                serde_json::from_str(&raw).map_err(|e| {
                    ClientError::Config(format!("invalid config at {}: {}", path.display(), e))
                })?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FINQUERY_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(token) = std::env::var("FINQUERY_TOKEN") {
            if !token.trim().is_empty() {
                self.bearer_token = Some(token.trim().to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "base_url must be http(s), got '{}'",
                self.base_url
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ClientError::Config(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.max_failures, 3);
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn validate_rejects_bad_scheme() {
        let config = ClientConfig {
            base_url: "ftp://example.com".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let config = ClientConfig {
            poll_interval_ms: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
