use super::*;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &ServerConfig) -> ConfigResult<()> {
        Self::validate_server_settings(config)?;
        Self::validate_backend(&config.backend)?;
        Self::validate_generation(&config.generation)?;

        if let Some(metrics) = &config.metrics {
            Self::validate_metrics(metrics)?;
        }

        Self::validate_compatibility(config)?;

        Ok(())
    }

    fn validate_server_settings(config: &ServerConfig) -> ConfigResult<()> {
        if config.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                value: config.port.to_string(),
                reason: "Port must be > 0".to_string(),
            });
        }

        if config.tokenizer_path.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "tokenizer_path".to_string(),
            });
        }

        if config.model_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "model_name".to_string(),
            });
        }

        if config.max_payload_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_payload_size".to_string(),
                value: config.max_payload_size.to_string(),
                reason: "Must be > 0".to_string(),
            });
        }

        if config.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_secs".to_string(),
                value: config.request_timeout_secs.to_string(),
                reason: "Must be > 0".to_string(),
            });
        }

        Ok(())
    }

    fn validate_backend(backend: &BackendConfig) -> ConfigResult<()> {
        match backend {
            BackendConfig::Local {
                channel_capacity,
                max_generation_secs,
            } => {
                if *channel_capacity == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "backend.channel_capacity".to_string(),
                        value: channel_capacity.to_string(),
                        reason: "Must be > 0".to_string(),
                    });
                }
                if *max_generation_secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "backend.max_generation_secs".to_string(),
                        value: max_generation_secs.to_string(),
                        reason: "Must be > 0".to_string(),
                    });
                }
            }
            BackendConfig::Remote { url, model_name } => {
                Self::validate_url(url, "backend.url")?;
                if model_name.trim().is_empty() {
                    return Err(ConfigError::MissingRequired {
                        field: "backend.model_name".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_url(url: &str, field: &str) -> ConfigResult<()> {
        if url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: field.to_string(),
            });
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: url.to_string(),
                reason: "URL must start with http:// or https://".to_string(),
            });
        }

        Ok(())
    }

    fn validate_generation(generation: &GenerationConfig) -> ConfigResult<()> {
        if generation.default_max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "generation.default_max_tokens".to_string(),
                value: generation.default_max_tokens.to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_metrics(metrics: &MetricsConfig) -> ConfigResult<()> {
        if metrics.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.port".to_string(),
                value: metrics.port.to_string(),
                reason: "Port must be > 0".to_string(),
            });
        }

        if metrics.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "metrics.host".to_string(),
                value: metrics.host.clone(),
                reason: "Host cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    fn validate_compatibility(config: &ServerConfig) -> ConfigResult<()> {
        if let Some(metrics) = &config.metrics {
            if metrics.port == config.port && metrics.host == config.host {
                return Err(ConfigError::IncompatibleConfig {
                    reason: format!(
                        "Metrics listener and server both bind {}:{}",
                        config.host, config.port
                    ),
                });
            }
        }
        Ok(())
    }
}
