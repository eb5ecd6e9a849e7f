use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigResult, ConfigValidator};

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Path to `tokenizer.json`
    pub tokenizer_path: String,
    /// Chat template file overriding the one shipped with the tokenizer
    pub chat_template_path: Option<String>,
    /// Model name accepted in `/v2/models/{model}/...`
    pub model_name: String,
    /// Where generated token ids come from
    pub backend: BackendConfig,
    /// Per-request generation defaults
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Maximum payload size in bytes
    pub max_payload_size: usize,
    /// Request timeout in seconds; also bounds remote inference calls
    pub request_timeout_secs: u64,
    /// Log directory (None = stdout only)
    pub log_dir: Option<String>,
    /// Log level (None = info)
    pub log_level: Option<String>,
    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,
    /// Metrics configuration (optional)
    pub metrics: Option<MetricsConfig>,
}

/// Token source selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BackendConfig {
    /// In-process generator on a blocking thread
    #[serde(rename = "local")]
    Local {
        /// Bound of the producer/consumer hand-off channel
        channel_capacity: usize,
        /// Wall-clock limit for one generation
        max_generation_secs: u64,
    },
    /// Decoupled streaming inference server
    #[serde(rename = "remote")]
    Remote {
        /// Base URL, e.g. `http://localhost:8000`
        url: String,
        /// Model name on the inference server
        model_name: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local {
            channel_capacity: 64,
            max_generation_secs: 300,
        }
    }
}

impl BackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Local { .. } => "local",
            BackendConfig::Remote { .. } => "remote",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Used when a request omits `max_tokens`
    pub default_max_tokens: u32,
    /// Let the tokenizer add BOS/EOS when encoding the rendered prompt
    pub add_special_tokens: bool,
    /// Drop the single space SentencePiece puts in front of the first delta
    pub strip_first_leading_space: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: 512,
            add_special_tokens: true,
            strip_first_leading_space: true,
        }
    }
}

/// Prometheus listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsConfig {
    pub port: u16,
    pub host: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: 29000,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            tokenizer_path: String::new(),
            chat_template_path: None,
            model_name: "mistral-streaming".to_string(),
            backend: BackendConfig::default(),
            generation: GenerationConfig::default(),
            max_payload_size: 4 * 1024 * 1024, // 4MB
            request_timeout_secs: 600,
            log_dir: None,
            log_level: None,
            log_json: false,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        ConfigValidator::validate(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_defaults() {
        let generation = GenerationConfig::default();
        assert_eq!(generation.default_max_tokens, 512);
        assert!(generation.add_special_tokens);
        assert!(generation.strip_first_leading_space);
    }

    #[test]
    fn test_backend_serde_tag() {
        let backend: BackendConfig = serde_json::from_str(
            r#"{"type": "remote", "url": "http://localhost:8001", "model_name": "mistral"}"#,
        )
        .unwrap();
        assert_eq!(
            backend,
            BackendConfig::Remote {
                url: "http://localhost:8001".to_string(),
                model_name: "mistral".to_string(),
            }
        );
        assert_eq!(backend.name(), "remote");
        assert_eq!(BackendConfig::default().name(), "local");
    }

    #[test]
    fn test_server_config_roundtrips_through_json() {
        let config = ServerConfig {
            tokenizer_path: "/models/mistral/tokenizer.json".to_string(),
            metrics: Some(MetricsConfig::default()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tokenizer_path, config.tokenizer_path);
        assert_eq!(parsed.backend, config.backend);
        assert_eq!(parsed.generation, config.generation);
        assert_eq!(parsed.request_timeout(), Duration::from_secs(600));
    }
}
