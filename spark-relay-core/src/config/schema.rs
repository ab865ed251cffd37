//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for spark-relay
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream model configuration
    #[serde(default)]
    pub spark: SparkConfig,
    /// Conversation history limits
    #[serde(default)]
    pub history: HistoryConfig,
    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Upstream chat model credentials and chat parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparkConfig {
    /// Base URL of the chat endpoint (http/https, rewritten to ws/wss)
    #[serde(default = "default_host_url")]
    pub host_url: String,
    /// Model domain sent in `parameter.chat.domain`
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Content auditing mode
    #[serde(default = "default_auditing")]
    pub auditing: String,
    /// Upstream WebSocket connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_host_url() -> String {
    "https://spark-api.xf-yun.com/v3.5/chat".to_string()
}

fn default_domain() -> String {
    "generalv3.5".to_string()
}

fn default_temperature() -> f32 {
    0.5
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_auditing() -> String {
    "default".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            host_url: default_host_url(),
            domain: default_domain(),
            app_id: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            auditing: default_auditing(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl SparkConfig {
    /// Check that the credentials needed to open an upstream session are set.
    pub fn require_credentials(&self) -> crate::Result<()> {
        let missing: Vec<&str> = [
            ("spark.app_id", &self.app_id),
            ("spark.api_key", &self.api_key),
            ("spark.api_secret", &self.api_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Config(format!(
                "missing upstream credentials: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Conversation history limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Total content budget across all turns, in characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Maximum number of oldest turns dropped per eviction
    #[serde(default = "default_evict_batch")]
    pub evict_batch: usize,
}

fn default_max_chars() -> usize {
    12_000
}

fn default_evict_batch() -> usize {
    5
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            evict_batch: default_evict_batch(),
        }
    }
}

/// HTTP gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// SSE inactivity timeout in seconds
    #[serde(default = "default_sse_timeout")]
    pub sse_timeout_secs: u64,
    /// Allowed CORS origins (empty = any origin)
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_sse_timeout() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            sse_timeout_secs: default_sse_timeout(),
            allowed_origins: Vec::new(),
        }
    }
}
