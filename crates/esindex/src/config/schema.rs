use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::api::{ApiSession, HttpMailApiOptions, LOW_PRIORITY};
use crate::coordinator::{
    BackoffPolicy, CoordinatorSettings, IndexMode, ALL_MAIL_LABEL, DEFAULT_INDEX_TIMEOUT,
    DEFAULT_LOW_STORAGE_BYTES, DEFAULT_PAGE_TIMEOUT,
};
use crate::error::ConfigError;
use crate::fetch::DEFAULT_PAGE_SIZE;
use crate::secrets::{has_secret_source, resolve_secret, SecretError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Source of the hex-encoded AES-256 key sealing the index.
    #[serde(default)]
    pub index_key: SecretSource,
}

/// Where a secret comes from. See [`crate::secrets::resolve_secret`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretSource {
    /// Direct value (for local development).
    /// WARNING: This stores the secret in plaintext in the config file.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "value")]
    pub value_insecure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl SecretSource {
    pub fn from_env_var(name: impl Into<String>) -> Self {
        Self {
            env_var: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.value_insecure.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    pub fn resolve(&self) -> Result<SecretString, SecretError> {
        resolve_secret(
            self.value_insecure.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Value of the `priority` request header.
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Session UID sent as `x-pm-uid`.
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub access_token: SecretSource,
}

fn default_base_url() -> String {
    HttpMailApiOptions::default().base_url
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_priority() -> String {
    LOW_PRIORITY.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            priority: default_priority(),
            uid: None,
            access_token: SecretSource::default(),
        }
    }
}

impl ApiConfig {
    pub fn options(&self) -> HttpMailApiOptions {
        HttpMailApiOptions {
            base_url: self.base_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            priority: self.priority.clone(),
        }
    }

    /// Resolves the session credentials.
    pub fn session(&self) -> Result<ApiSession, ConfigError> {
        let uid = self
            .uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| ConfigError::Validation {
                message: "api.uid is required to open a session".to_string(),
            })?;
        let access_token = self
            .access_token
            .resolve()
            .map_err(|source| ConfigError::Secret {
                name: "api.access_token".to_string(),
                source,
            })?;
        Ok(ApiSession { uid, access_token })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_label_id")]
    pub label_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_reduced_concurrent")]
    pub reduced_concurrent: usize,
    #[serde(default = "RetryConfig::pages")]
    pub page_retry: RetryConfig,
    #[serde(default = "RetryConfig::messages")]
    pub message_retry: RetryConfig,
    #[serde(default)]
    pub mode: IndexMode,
    /// Index size cap in bytes. Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_limit_bytes: Option<u64>,
    /// Free disk space below which indexing stops.
    #[serde(default = "default_low_storage_bytes")]
    pub low_storage_bytes: u64,
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,
    /// Per-message watchdog within a page.
    #[serde(default = "default_index_timeout")]
    pub index_timeout_secs: u64,
}

fn default_label_id() -> String {
    ALL_MAIL_LABEL.to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_concurrent() -> usize {
    CoordinatorSettings::default().max_concurrent
}

fn default_reduced_concurrent() -> usize {
    CoordinatorSettings::default().reduced_concurrent
}

fn default_low_storage_bytes() -> u64 {
    DEFAULT_LOW_STORAGE_BYTES
}

fn default_page_timeout() -> u64 {
    DEFAULT_PAGE_TIMEOUT.as_secs()
}

fn default_index_timeout() -> u64 {
    DEFAULT_INDEX_TIMEOUT.as_secs()
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            label_id: default_label_id(),
            page_size: default_page_size(),
            max_concurrent: default_max_concurrent(),
            reduced_concurrent: default_reduced_concurrent(),
            page_retry: RetryConfig::pages(),
            message_retry: RetryConfig::messages(),
            mode: IndexMode::default(),
            storage_limit_bytes: None,
            low_storage_bytes: default_low_storage_bytes(),
            page_timeout_secs: default_page_timeout(),
            index_timeout_secs: default_index_timeout(),
        }
    }
}

impl IndexingConfig {
    pub fn settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            label_id: self.label_id.clone(),
            page_size: self.page_size,
            max_concurrent: self.max_concurrent,
            reduced_concurrent: self.reduced_concurrent,
            page_retry: self.page_retry.policy(),
            message_retry: self.message_retry.policy(),
            mode: self.mode,
            storage_limit: self.storage_limit_bytes,
            low_storage_bytes: self.low_storage_bytes,
            page_timeout: Duration::from_secs(self.page_timeout_secs),
            index_timeout: Duration::from_secs(self.index_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    fn from_policy(policy: BackoffPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }

    pub fn pages() -> Self {
        Self::from_policy(BackoffPolicy::pages())
    }

    pub fn messages() -> Self {
        Self::from_policy(BackoffPolicy::messages())
    }

    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `~/.esindex/data/esindex.db`.
    #[serde(default)]
    pub path: Option<String>,
}

impl DatabaseConfig {
    /// The configured path with `~` expanded, or the default location.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => Some(expand_home(path)),
            None => crate::db::default_database_path(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
