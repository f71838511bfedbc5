use jwt_simple::algorithms::ECDSAP256KeyPairLike;
use jwt_simple::prelude::{Claims, Duration as JwtDuration, ES256KeyPair};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use time::{Duration, OffsetDateTime};

use crate::config;
use crate::error::PushError;
use crate::ports;
use crate::push::keys::{self, PrivateKey, PublicKey};
use crate::types::push::{ContentEncoding, VapidConfig};

/// Push services reject tokens that live longer than a day.
pub const MAX_TOKEN_EXPIRY: Duration = Duration::hours(24);
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::hours(12);
/// Cached tokens are re-signed once they are this close to expiring.
const REUSE_MARGIN: Duration = Duration::seconds(60);

#[derive(Debug, Clone)]
pub enum VapidConfigStatus {
    Missing,
    Incomplete,
    Ready(VapidConfig),
}

pub fn load_vapid_config(config: &config::AppConfig) -> VapidConfigStatus {
    let private_key = config.vapid_private_key.as_ref();
    let public_key = config.vapid_public_key.as_ref();
    let subject = config.vapid_subject.as_ref();
    let has_any = private_key.is_some() || public_key.is_some() || subject.is_some();

    match (private_key, public_key, subject) {
        (Some(private_key), Some(public_key), Some(subject)) => {
            VapidConfigStatus::Ready(VapidConfig {
                private_key: private_key.clone(),
                public_key: public_key.clone(),
                subject: subject.clone(),
            })
        }
        _ if has_any => VapidConfigStatus::Incomplete,
        _ => VapidConfigStatus::Missing,
    }
}

/// Validated VAPID key pair plus the `sub` claim.
#[derive(Debug, Clone)]
pub struct VapidCredentials {
    public_key: PublicKey,
    private_key: PrivateKey,
    subject: String,
}

impl VapidCredentials {
    /// Checks the public key, then the private key, then the subject.
    pub fn new(public_key: &str, private_key: &str, subject: &str) -> Result<Self, PushError> {
        let public_key = keys::parse_public_key(public_key)?;
        let private_key = keys::parse_private_key(private_key)?;
        let subject = validate_subject(subject)?;
        if private_key.public_key() != public_key {
            log::warn!("vapid public key does not belong to the configured private key");
        }
        Ok(Self {
            public_key,
            private_key,
            subject,
        })
    }

    pub fn from_config(vapid: &VapidConfig) -> Result<Self, PushError> {
        Self::new(&vapid.public_key, &vapid.private_key, &vapid.subject)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

fn validate_subject(subject: &str) -> Result<String, PushError> {
    let subject = subject.trim();
    if subject.starts_with("mailto:") && subject.len() > "mailto:".len() {
        return Ok(subject.to_string());
    }
    match Url::parse(subject) {
        Ok(url) if matches!(url.scheme(), "https" | "http") && url.has_host() => {
            Ok(subject.to_string())
        }
        _ => Err(PushError::InvalidArgument(format!(
            "vapid subject must be an http(s) URL or a mailto: URI, got '{subject}'"
        ))),
    }
}

/// Scheme, host and non-default port of a push endpoint.
pub fn audience_origin(endpoint: &str) -> Result<String, PushError> {
    let url = Url::parse(endpoint).map_err(|err| {
        PushError::ValidationFailed(format!("invalid endpoint '{endpoint}': {err}"))
    })?;
    if !url.has_host() {
        return Err(PushError::ValidationFailed(format!(
            "endpoint '{endpoint}' has no host"
        )));
    }
    Ok(url.origin().ascii_serialization())
}

/// A signed token for one audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedVapid {
    pub token: String,
    pub public_key: String,
    pub audience: String,
    pub expires_at: OffsetDateTime,
}

impl SignedVapid {
    pub fn authorization_header(&self, encoding: ContentEncoding) -> String {
        match encoding {
            ContentEncoding::Aes128Gcm => format!("vapid t={}, k={}", self.token, self.public_key),
            ContentEncoding::AesGcm => format!("WebPush {}", self.token),
        }
    }

    pub fn crypto_key_header(&self) -> String {
        format!("p256ecdsa={}", self.public_key)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignerOptions {
    pub expiry: Duration,
    pub reuse_headers: bool,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_TOKEN_EXPIRY,
            reuse_headers: true,
        }
    }
}

pub struct VapidSigner<T> {
    credentials: VapidCredentials,
    key_pair: ES256KeyPair,
    public_key: String,
    expiry: Duration,
    cache: Option<RwLock<HashMap<String, Arc<SignedVapid>>>>,
    time: T,
}

impl<T> std::fmt::Debug for VapidSigner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidSigner")
            .field("subject", &self.credentials.subject)
            .field("public_key", &self.public_key)
            .field("expiry", &self.expiry)
            .field("reuse_headers", &self.cache.is_some())
            .finish()
    }
}

impl<T: ports::TimeProvider> VapidSigner<T> {
    pub fn new(
        credentials: VapidCredentials,
        time: T,
        options: SignerOptions,
    ) -> Result<Self, PushError> {
        if options.expiry <= Duration::ZERO || options.expiry > MAX_TOKEN_EXPIRY {
            return Err(PushError::InvalidArgument(format!(
                "vapid expiry must be between 1 second and 24 hours, got {}s",
                options.expiry.whole_seconds()
            )));
        }
        let key_pair = ES256KeyPair::from_bytes(&credentials.private_key.to_bytes())
            .map_err(|err| PushError::InvalidKey(format!("private key rejected: {err}")))?;
        let public_key = credentials.public_key.to_base64url();
        Ok(Self {
            credentials,
            key_pair,
            public_key,
            expiry: options.expiry,
            cache: options.reuse_headers.then(|| RwLock::new(HashMap::new())),
            time,
        })
    }

    pub fn credentials(&self) -> &VapidCredentials {
        &self.credentials
    }

    /// Signs for `audience`, reusing a cached token when allowed.
    pub fn sign(&self, audience: &str) -> Result<Arc<SignedVapid>, PushError> {
        let now = self.time.now();
        let Some(cache) = &self.cache else {
            return self.sign_fresh(audience, now).map(Arc::new);
        };

        {
            let entries = cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(audience)
                && entry.expires_at - REUSE_MARGIN > now
            {
                log::debug!("reusing vapid headers for {audience}");
                return Ok(Arc::clone(entry));
            }
        }

        let signed = Arc::new(self.sign_fresh(audience, now)?);
        cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(audience.to_string(), Arc::clone(&signed));
        Ok(signed)
    }

    fn sign_fresh(&self, audience: &str, now: OffsetDateTime) -> Result<SignedVapid, PushError> {
        let expires_at = now + self.expiry;
        let expires_unix = u64::try_from(expires_at.unix_timestamp())
            .map_err(|_| PushError::Signing("clock is before the unix epoch".to_string()))?;

        let mut claims = Claims::create(JwtDuration::from_secs(self.expiry.whole_seconds() as u64))
            .with_audience(audience)
            .with_subject(&self.credentials.subject);
        claims.issued_at = None;
        claims.invalid_before = None;
        claims.expires_at = Some(JwtDuration::from_secs(expires_unix));

        let token = self
            .key_pair
            .sign(claims)
            .map_err(|err| PushError::Signing(err.to_string()))?;
        Ok(SignedVapid {
            token,
            public_key: self.public_key.clone(),
            audience: audience.to_string(),
            expires_at,
        })
    }
}
