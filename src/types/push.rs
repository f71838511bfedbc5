use serde::{Deserialize, Serialize};

use crate::error::PushError;

/// Base64url VAPID material as it comes out of configuration.
#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub private_key: String,
    pub public_key: String,
    pub subject: String,
}

/// Longest content-encoding value a subscription may carry.
pub const MAX_CONTENT_ENCODING_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentEncoding {
    #[serde(rename = "aesgcm")]
    AesGcm,
    #[serde(rename = "aes128gcm")]
    Aes128Gcm,
}

impl ContentEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentEncoding::AesGcm => "aesgcm",
            ContentEncoding::Aes128Gcm => "aes128gcm",
        }
    }
}

impl std::fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentEncoding {
    type Err = PushError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.chars().count() > MAX_CONTENT_ENCODING_LENGTH {
            return Err(PushError::ValidationFailed(format!(
                "content encoding may not be longer than {MAX_CONTENT_ENCODING_LENGTH} characters"
            )));
        }
        match value {
            "aesgcm" => Ok(ContentEncoding::AesGcm),
            "aes128gcm" => Ok(ContentEncoding::Aes128Gcm),
            other => Err(PushError::ValidationFailed(format!(
                "unsupported content encoding '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    VeryLow,
    Low,
    Normal,
    High,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::VeryLow => "very-low",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

impl std::str::FromStr for Urgency {
    type Err = PushError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "very-low" => Ok(Urgency::VeryLow),
            "low" => Ok(Urgency::Low),
            "normal" => Ok(Urgency::Normal),
            "high" => Ok(Urgency::High),
            other => Err(PushError::InvalidArgument(format!(
                "urgency must be one of very-low, low, normal, high; got '{other}'"
            ))),
        }
    }
}
