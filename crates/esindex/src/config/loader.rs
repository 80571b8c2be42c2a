use std::path::Path;

use crate::config::schema::{Config, RetryConfig};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let base_url = &config.api.base_url;
    if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
        return Err(ConfigError::Validation {
            message: format!("api.base_url must be an http(s) URL: {}", base_url),
        });
    }

    let indexing = &config.indexing;
    if indexing.page_size == 0 {
        return Err(ConfigError::Validation {
            message: "indexing.page_size must be at least 1".to_string(),
        });
    }
    if indexing.max_concurrent == 0 || indexing.reduced_concurrent == 0 {
        return Err(ConfigError::Validation {
            message: "indexing concurrency must be at least 1".to_string(),
        });
    }
    if indexing.reduced_concurrent > indexing.max_concurrent {
        return Err(ConfigError::Validation {
            message: format!(
                "indexing.reduced_concurrent ({}) exceeds max_concurrent ({})",
                indexing.reduced_concurrent, indexing.max_concurrent
            ),
        });
    }

    validate_retry("page_retry", &indexing.page_retry)?;
    validate_retry("message_retry", &indexing.message_retry)?;

    Ok(())
}

fn validate_retry(name: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::InvalidRetry {
            name: name.to_string(),
            reason: "max_attempts must be at least 1".to_string(),
        });
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::InvalidRetry {
            name: name.to_string(),
            reason: format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                retry.base_delay_ms, retry.max_delay_ms
            ),
        });
    }
    Ok(())
}
