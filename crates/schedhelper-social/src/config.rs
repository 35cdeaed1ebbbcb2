//! Runtime configuration.

use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use schedhelper_store::{StoreConfig, MAX_BATCH_WRITE_ITEMS};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::fanout::FanoutConfig;

/// Configuration shared by the service and the admin binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// DynamoDB table holding every row.
    pub table_name: String,
    /// AWS region override.
    pub region: Option<String>,
    /// Endpoint override, e.g. DynamoDB Local.
    pub endpoint: Option<String>,
    /// Bound on each store call in milliseconds.
    pub store_timeout_ms: u64,
    /// Requests per batch chunk (at most 25).
    pub max_batch_items: usize,
    /// Bound on each push delivery in milliseconds.
    pub push_timeout_ms: u64,
    /// Maximum concurrent push deliveries per fan-out.
    pub fanout_concurrency: usize,
    /// Lifetime of an interested-section entry.
    pub interested_section_ttl_days: u32,
    /// Domain appended to user ids to form email addresses.
    pub email_domain: String,
    /// Photo URL used when a user has none.
    pub default_photo_url: String,
    /// Push relay endpoint; deliveries are dropped when unset.
    pub push_relay_url: Option<String>,
    /// Default tracing filter directive when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            table_name: "SCU-Schedule-Helper".to_string(),
            region: None,
            endpoint: None,
            store_timeout_ms: 5_000,
            max_batch_items: MAX_BATCH_WRITE_ITEMS,
            push_timeout_ms: 10_000,
            fanout_concurrency: 16,
            interested_section_ttl_days: 45,
            email_domain: "scu.edu".to_string(),
            default_photo_url: String::new(),
            push_relay_url: None,
            log_level: "info".to_string(),
        }
    }
}

impl HelperConfig {
    /// Loads a TOML or JSON config file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {}", path.display(), e)))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: HelperConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| ServiceError::Config(e.to_string()))?,
            "json" => {
                serde_json::from_str(&contents).map_err(|e| ServiceError::Config(e.to_string()))?
            }
            _ => {
                return Err(ServiceError::Config(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(ServiceError::Config("table_name cannot be empty".to_string()));
        }
        if self.store_timeout_ms == 0 {
            return Err(ServiceError::Config("store_timeout_ms must be positive".to_string()));
        }
        if self.push_timeout_ms == 0 {
            return Err(ServiceError::Config("push_timeout_ms must be positive".to_string()));
        }
        if self.max_batch_items == 0 || self.max_batch_items > MAX_BATCH_WRITE_ITEMS {
            return Err(ServiceError::Config(format!(
                "max_batch_items must be between 1 and {}",
                MAX_BATCH_WRITE_ITEMS
            )));
        }
        if self.fanout_concurrency == 0 {
            return Err(ServiceError::Config(
                "fanout_concurrency must be at least 1".to_string(),
            ));
        }
        if self.interested_section_ttl_days == 0 {
            return Err(ServiceError::Config(
                "interested_section_ttl_days must be positive".to_string(),
            ));
        }
        if self.email_domain.is_empty() || self.email_domain.contains('@') {
            return Err(ServiceError::Config(format!(
                "invalid email_domain: {:?}",
                self.email_domain
            )));
        }
        if let Some(url) = &self.push_relay_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ServiceError::Config(format!(
                    "push_relay_url must be an http(s) URL: {}",
                    url
                )));
            }
        }
        Ok(())
    }

    /// Record store settings.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            timeout: Duration::from_millis(self.store_timeout_ms),
            max_batch_items: self.max_batch_items,
        }
    }

    /// Fan-out engine settings.
    pub fn fanout_config(&self) -> FanoutConfig {
        FanoutConfig {
            max_concurrency: self.fanout_concurrency,
            push_timeout: Duration::from_millis(self.push_timeout_ms),
        }
    }

    /// Lifetime of an interested-section entry.
    pub fn interested_section_ttl(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.interested_section_ttl_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = HelperConfig::default();
        assert_eq!(config.store_timeout_ms, 5_000);
        assert_eq!(config.max_batch_items, 25);
        assert_eq!(config.fanout_concurrency, 16);
        assert_eq!(config.interested_section_ttl_days, 45);
        assert_eq!(config.email_domain, "scu.edu");
        assert!(config.push_relay_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = HelperConfig {
            fanout_concurrency: 0,
            ..HelperConfig::default()
        };
        assert!(matches!(config.validate(), Err(ServiceError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_batches() {
        let config = HelperConfig {
            max_batch_items: 26,
            ..HelperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_relay_url() {
        let config = HelperConfig {
            push_relay_url: Some("relay.internal:8080".to_string()),
            ..HelperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_email_domain_with_at() {
        let config = HelperConfig {
            email_domain: "@scu.edu".to_string(),
            ..HelperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
table_name = "sh-test"
endpoint = "http://localhost:8000"
fanout_concurrency = 4
"#
        )
        .unwrap();

        let config = HelperConfig::from_file(file.path()).unwrap();
        assert_eq!(config.table_name, "sh-test");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:8000"));
        assert_eq!(config.fanout_concurrency, 4);
        assert_eq!(config.push_timeout_ms, 10_000);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{"push_relay_url": "https://push.example.com/send", "interested_section_ttl_days": 30}}"#
        )
        .unwrap();

        let config = HelperConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.push_relay_url.as_deref(),
            Some("https://push.example.com/send")
        );
        assert_eq!(config.interested_section_ttl(), TimeDelta::days(30));
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(matches!(
            HelperConfig::from_file(file.path()),
            Err(ServiceError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_validates() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "store_timeout_ms = 0").unwrap();
        assert!(HelperConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_store_and_fanout_configs() {
        let config = HelperConfig {
            store_timeout_ms: 1_500,
            push_timeout_ms: 700,
            fanout_concurrency: 3,
            ..HelperConfig::default()
        };
        assert_eq!(config.store_config().timeout, Duration::from_millis(1_500));
        let fanout = config.fanout_config();
        assert_eq!(fanout.max_concurrency, 3);
        assert_eq!(fanout.push_timeout, Duration::from_millis(700));
    }
}
