use thiserror::Error;

/// How a push service rejected a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The request will never succeed as sent (other 4xx).
    Permanent,
    /// Rate limited or the push service is unavailable (429, 5xx, timeouts).
    Retryable,
    /// The subscription no longer exists (404, 410).
    Expired,
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Permanent => f.write_str("permanent"),
            DeliveryFailure::Retryable => f.write_str("retryable"),
            DeliveryFailure::Expired => f.write_str("expired"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("malformed base64url in {field}")]
    MalformedEncoding { field: &'static str },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("delivery failed ({kind}): {message}")]
    DeliveryFailed {
        kind: DeliveryFailure,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("dispatch cancelled")]
    Cancelled,
    #[error("payload encryption failed")]
    Encryption,
    #[error("vapid signing failed: {0}")]
    Signing(String),
}

impl PushError {
    pub fn delivery_failure(&self) -> Option<DeliveryFailure> {
        match self {
            PushError::DeliveryFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
