use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::Duration;

use crate::push::dispatcher::{
    DEFAULT_MAX_CONCURRENCY, DEFAULT_TTL, DispatcherOptions, MessageOptions,
};
use crate::push::encryption::MAX_COMPATIBILITY_PAYLOAD_LENGTH;
use crate::push::vapid::{DEFAULT_TOKEN_EXPIRY, SignerOptions, VapidConfigStatus, load_vapid_config};
use crate::types::push::{Urgency, VapidConfig};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{field}: key file {} {problem}", path.display())]
    KeyFile {
        field: &'static str,
        path: PathBuf,
        problem: String,
    },
    #[error("push is not configured; set the VAPID keys and subject")]
    MissingVapid,
    #[error("incomplete VAPID configuration; the public key, private key and subject are all required")]
    IncompleteVapid,
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub vapid_private_key: Option<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_subject: Option<String>,
    pub store_path: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
    pub reuse_vapid_headers: bool,
    pub ttl: u32,
    pub urgency: Option<Urgency>,
    pub topic: Option<String>,
    pub padding: usize,
    pub vapid_expiry_secs: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vapid_private_key: None,
            vapid_public_key: None,
            vapid_subject: None,
            store_path: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            reuse_vapid_headers: true,
            ttl: DEFAULT_TTL,
            urgency: None,
            topic: None,
            padding: MAX_COMPATIBILITY_PAYLOAD_LENGTH,
            vapid_expiry_secs: DEFAULT_TOKEN_EXPIRY.whole_seconds(),
        }
    }
}

/// On-disk layout of the TOML config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub vapid: VapidSection,
    #[serde(default)]
    pub delivery: DeliverySection,
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VapidSection {
    pub subject: Option<String>,
    pub public_key: Option<String>,
    pub private_key: Option<String>,
    pub public_key_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub expiry_secs: Option<i64>,
    pub reuse_headers: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySection {
    pub ttl: Option<u32>,
    pub urgency: Option<Urgency>,
    pub topic: Option<String>,
    pub padding: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub max_concurrency: Option<usize>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_file_config(file, base_dir)
    }

    /// Relative key and store paths are resolved against `base_dir`.
    pub fn from_file_config(file: FileConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let vapid = file.vapid;
        let delivery = file.delivery;
        let config = Self {
            vapid_public_key: resolve_key(
                "public key",
                vapid.public_key,
                vapid.public_key_path.map(|path| base_dir.join(path)),
            )?,
            vapid_private_key: resolve_key(
                "private key",
                vapid.private_key,
                vapid.private_key_path.map(|path| base_dir.join(path)),
            )?,
            vapid_subject: vapid.subject,
            store_path: file.store_path.map(|path| base_dir.join(path)),
            timeout_secs: delivery.timeout_secs.unwrap_or(defaults.timeout_secs),
            max_concurrency: delivery.max_concurrency.unwrap_or(defaults.max_concurrency),
            reuse_vapid_headers: vapid.reuse_headers.unwrap_or(defaults.reuse_vapid_headers),
            ttl: delivery.ttl.unwrap_or(defaults.ttl),
            urgency: delivery.urgency,
            topic: delivery.topic,
            padding: delivery.padding.unwrap_or(defaults.padding),
            vapid_expiry_secs: vapid.expiry_secs.unwrap_or(defaults.vapid_expiry_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.vapid_expiry_secs <= 0 {
            return Err(ConfigError::Invalid(
                "vapid expiry_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_vapid(&self) -> Result<VapidConfig, ConfigError> {
        match load_vapid_config(self) {
            VapidConfigStatus::Ready(vapid) => Ok(vapid),
            VapidConfigStatus::Incomplete => Err(ConfigError::IncompleteVapid),
            VapidConfigStatus::Missing => Err(ConfigError::MissingVapid),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            max_concurrency: self.max_concurrency,
            padding: self.padding,
            message: MessageOptions {
                ttl: self.ttl,
                urgency: self.urgency,
                topic: self.topic.clone(),
            },
            signer: SignerOptions {
                expiry: Duration::seconds(self.vapid_expiry_secs),
                reuse_headers: self.reuse_vapid_headers,
            },
        }
    }
}

/// Inline value or file contents, trimmed. Giving both is an error.
pub fn resolve_key(
    field: &'static str,
    inline: Option<String>,
    path: Option<PathBuf>,
) -> Result<Option<String>, ConfigError> {
    match (inline, path) {
        (Some(_), Some(_)) => Err(ConfigError::Invalid(format!(
            "{field} is configured both inline and as a file"
        ))),
        (Some(inline), None) => Ok(Some(inline.trim().to_string())),
        (None, Some(path)) => read_key_file(field, &path).map(Some),
        (None, None) => Ok(None),
    }
}

fn read_key_file(field: &'static str, path: &Path) -> Result<String, ConfigError> {
    let key_file_error = |problem: String| ConfigError::KeyFile {
        field,
        path: path.to_path_buf(),
        problem,
    };
    if !path.exists() {
        return Err(key_file_error("does not exist".to_string()));
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|err| key_file_error(format!("is not readable ({err})")))?;
    let key = contents.trim();
    if key.is_empty() {
        return Err(key_file_error("is empty".to_string()));
    }
    Ok(key.to_string())
}
