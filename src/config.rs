//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_BILLING_INITIAL_CREDITS, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub billing: BillingConfig,
    pub inference: InferenceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Billing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Credits granted to a freshly created account.
    pub initial_credits: u64,
}

/// Inference backend settings.
///
/// ## Fields:
/// - `asr_base_url`: base URL of the external ASR service (no trailing slash)
/// - `request_timeout_secs`: upper bound on one inference attempt; a call
///   past this bound is settled as a timeout, not left hanging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub asr_base_url: String,
    pub request_timeout_secs: u64,
}

impl InferenceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            billing: BillingConfig {
                // Small starter grant so a new account can try a few models
                initial_credits: 10,
            },
            inference: InferenceConfig {
                asr_base_url: "http://127.0.0.1:8011".to_string(),
                request_timeout_secs: 120,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and the environment,
    /// in that order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: override server host
    /// - `APP_BILLING_INITIAL_CREDITS=25`: override the starter grant
    /// - `APP_INFERENCE_ASR_BASE_URL=http://asr:8011`: override the ASR service
    /// - `HOST`/`PORT`: deployment-platform special cases
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.inference.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "Inference request timeout must be greater than 0"
            ));
        }

        if self.inference.asr_base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("ASR base URL cannot be empty"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config
    /// updates). Only the fields present in the JSON are touched.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(billing) = partial_config.get("billing") {
            if let Some(credits) = billing.get("initial_credits").and_then(|v| v.as_u64()) {
                self.billing.initial_credits = credits;
            }
        }

        if let Some(inference) = partial_config.get("inference") {
            if let Some(url) = inference.get("asr_base_url").and_then(|v| v.as_str()) {
                self.inference.asr_base_url = url.to_string();
            }
            if let Some(timeout) = inference
                .get("request_timeout_secs")
                .and_then(|v| v.as_u64())
            {
                self.inference.request_timeout_secs = timeout;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.billing.initial_credits, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.inference.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json =
            r#"{"billing": {"initial_credits": 25}, "inference": {"request_timeout_secs": 30}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.billing.initial_credits, 25);
        assert_eq!(config.inference.request_timeout_secs, 30);
        // Untouched sections keep their values.
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        let json = r#"{"inference": {"request_timeout_secs": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
