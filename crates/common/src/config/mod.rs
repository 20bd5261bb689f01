//! Configuration management for ReceiptFlow services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Notion database service configuration
    #[serde(default)]
    pub notion: NotionConfig,

    /// Receipt extraction (OCR) configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload form limits
    #[serde(default)]
    pub upload: UploadConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotionConfig {
    /// Integration token
    #[serde(default)]
    pub api_key: String,

    /// API base URL
    #[serde(default = "default_notion_api_base")]
    pub api_base: String,

    /// Value of the Notion-Version header
    #[serde(default = "default_notion_version")]
    pub version: String,

    /// Target database receiving one row per receipt
    #[serde(default)]
    pub database_id: String,

    /// Lookup table bound to the "Category" relation
    #[serde(default)]
    pub category_database_id: String,

    /// Lookup table bound to the "Mode" relation
    #[serde(default)]
    pub mode_database_id: String,

    /// Title property searched in lookup tables
    #[serde(default = "default_lookup_title_property")]
    pub lookup_title_property: String,

    /// Page size sent with lookup searches
    #[serde(default = "default_search_page_size")]
    pub search_page_size: u32,

    /// Schema cache TTL in seconds (0 disables caching)
    #[serde(default = "default_schema_cache_ttl")]
    pub schema_cache_ttl_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    /// Extraction provider: mindee, mock
    #[serde(default = "default_extraction_provider")]
    pub provider: String,

    /// API key for the extraction service
    pub api_key: Option<String>,

    /// Prediction endpoint
    #[serde(default = "default_extraction_endpoint")]
    pub endpoint: String,

    /// Constant written to the "Mode" field of every receipt
    #[serde(default = "default_mode")]
    pub default_mode: String,

    /// Request timeout in seconds
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage provider: gdrive, mock
    #[serde(default = "default_storage_provider")]
    pub provider: String,

    /// Service account key as inline JSON
    pub service_account_json: Option<String>,

    /// Path to a service account key file
    pub service_account_path: Option<String>,

    /// Folder receiving uploaded receipts (created when missing)
    #[serde(default = "default_folder_name")]
    pub folder_name: String,

    /// Optional parent of the upload folder
    pub parent_folder_id: Option<String>,

    /// Google APIs base URL
    #[serde(default = "default_google_api_base")]
    pub api_base: String,

    /// Request timeout in seconds
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,

    /// Accepted file extensions, lowercase with leading dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_notion_api_base() -> String { "https://api.notion.com/v1".to_string() }
fn default_notion_version() -> String { "2022-06-28".to_string() }
fn default_lookup_title_property() -> String { "Name".to_string() }
fn default_search_page_size() -> u32 { 10 }
fn default_schema_cache_ttl() -> u64 { 60 }
fn default_upstream_timeout() -> u64 { 30 }
fn default_extraction_provider() -> String { "mindee".to_string() }
fn default_extraction_endpoint() -> String {
    "https://api.mindee.net/v1/products/mindee/expense_receipts/v5/predict".to_string()
}
fn default_mode() -> String { "Credit Card".to_string() }
fn default_extraction_timeout() -> u64 { 60 }
fn default_storage_provider() -> String { "gdrive".to_string() }
fn default_folder_name() -> String { "test_notion_upload".to_string() }
fn default_google_api_base() -> String { "https://www.googleapis.com".to_string() }
fn default_storage_timeout() -> u64 { 60 }
fn default_max_upload_bytes() -> usize { 10 * 1024 * 1024 }
fn default_allowed_extensions() -> Vec<String> {
    [".pdf", ".png", ".jpeg", ".jpg"].iter().map(|s| s.to_string()).collect()
}
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "receiptflow".to_string() }
fn default_rate_limit() -> u32 { 10 }
fn default_burst() -> u32 { 20 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__NOTION__API_KEY=secret_xxx
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_extensions")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Check that every secret and identifier the selected providers need is present
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| AppError::Configuration {
            message: format!("{} is required", field),
        };

        if self.notion.api_key.trim().is_empty() {
            return Err(missing("notion.api_key"));
        }
        if self.notion.database_id.trim().is_empty() {
            return Err(missing("notion.database_id"));
        }
        if self.notion.search_page_size == 0 || self.notion.search_page_size > 100 {
            return Err(AppError::Configuration {
                message: "notion.search_page_size must be between 1 and 100".to_string(),
            });
        }

        match self.extraction.provider.as_str() {
            "mindee" => {
                if self.extraction.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                    return Err(missing("extraction.api_key"));
                }
            }
            "mock" => {}
            other => {
                return Err(AppError::Configuration {
                    message: format!("unknown extraction provider '{}'", other),
                })
            }
        }

        match self.storage.provider.as_str() {
            "gdrive" => {
                if self.storage.service_account_json.is_none()
                    && self.storage.service_account_path.is_none()
                {
                    return Err(missing(
                        "storage.service_account_json or storage.service_account_path",
                    ));
                }
            }
            "mock" => {}
            other => {
                return Err(AppError::Configuration {
                    message: format!("unknown storage provider '{}'", other),
                })
            }
        }

        if self.rate_limit.enabled
            && (self.rate_limit.requests_per_second == 0 || self.rate_limit.burst == 0)
        {
            return Err(AppError::Configuration {
                message: "rate_limit.requests_per_second and rate_limit.burst must be positive"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Get the schema cache TTL as Duration
    pub fn schema_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.notion.schema_cache_ttl_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_notion_api_base(),
            version: default_notion_version(),
            database_id: String::new(),
            category_database_id: String::new(),
            mode_database_id: String::new(),
            lookup_title_property: default_lookup_title_property(),
            search_page_size: default_search_page_size(),
            schema_cache_ttl_secs: default_schema_cache_ttl(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_extraction_provider(),
            api_key: None,
            endpoint: default_extraction_endpoint(),
            default_mode: default_mode(),
            timeout_secs: default_extraction_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_storage_provider(),
            service_account_json: None,
            service_account_path: None,
            folder_name: default_folder_name(),
            parent_folder_id: None,
            api_base: default_google_api_base(),
            timeout_secs: default_storage_timeout(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn configured() -> AppConfig {
        let mut config = AppConfig::default();
        config.notion.api_key = "secret_test".into();
        config.notion.database_id = "db-main".into();
        config.extraction.api_key = Some("mindee-key".into());
        config.storage.service_account_path = Some("sa.json".into());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.extraction.default_mode, "Credit Card");
        assert_eq!(config.notion.version, "2022-06-28");
        assert_eq!(config.storage.folder_name, "test_notion_upload");
        assert_eq!(config.upload.allowed_extensions.len(), 4);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert_ok!(configured().validate());
    }

    #[test]
    fn test_validate_requires_notion_key() {
        let mut config = configured();
        config.notion.api_key = "  ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("notion.api_key"));
    }

    #[test]
    fn test_mock_providers_need_no_secrets() {
        let mut config = configured();
        config.extraction.provider = "mock".into();
        config.extraction.api_key = None;
        config.storage.provider = "mock".into();
        config.storage.service_account_path = None;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = configured();
        config.storage.provider = "s3".into();
        assert!(matches!(
            config.validate(),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_schema_cache_ttl() {
        let mut config = AppConfig::default();
        config.notion.schema_cache_ttl_secs = 0;
        assert_eq!(config.schema_cache_ttl(), Duration::ZERO);
    }
}
