use base64::{URL_SAFE_NO_PAD, decode_config, encode_config};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

use crate::error::PushError;

pub const PUBLIC_KEY_LENGTH: usize = 65;
pub const PRIVATE_KEY_LENGTH: usize = 32;
pub const AUTH_SECRET_LENGTH: usize = 16;

/// Uncompressed P-256 point, validated to lie on the curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    point: p256::PublicKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PushError> {
        Self::from_bytes_named("public key", bytes)
    }

    pub(crate) fn from_bytes_named(field: &'static str, bytes: &[u8]) -> Result<Self, PushError> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(PushError::InvalidKey(format!(
                "{field} should be {PUBLIC_KEY_LENGTH} bytes long when decoded, got {}",
                bytes.len()
            )));
        }
        let point = p256::PublicKey::from_sec1_bytes(bytes).map_err(|_| {
            PushError::InvalidKey(format!("{field} is not a point on the P-256 curve"))
        })?;
        Ok(Self { point })
    }

    pub(crate) fn from_base64url_named(
        field: &'static str,
        encoded: &str,
    ) -> Result<Self, PushError> {
        let bytes = decode_base64url(field, encoded)?;
        Self::from_bytes_named(field, &bytes)
    }

    /// SEC1 uncompressed encoding (`0x04 || x || y`).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.point.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn to_base64url(&self) -> String {
        encode_base64url(self.to_bytes())
    }

    pub(crate) fn as_p256(&self) -> &p256::PublicKey {
        &self.point
    }
}

/// Raw P-256 scalar.
#[derive(Clone)]
pub struct PrivateKey {
    secret: p256::SecretKey,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PushError> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(PushError::InvalidKey(format!(
                "private key should be {PRIVATE_KEY_LENGTH} bytes long when decoded, got {}",
                bytes.len()
            )));
        }
        let secret = p256::SecretKey::from_slice(bytes).map_err(|_| {
            PushError::InvalidKey("private key is not a valid P-256 scalar".to_string())
        })?;
        Ok(Self { secret })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.secret.to_bytes().to_vec()
    }

    pub fn to_base64url(&self) -> String {
        encode_base64url(self.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            point: self.secret.public_key(),
        }
    }
}

pub fn parse_public_key(encoded: &str) -> Result<PublicKey, PushError> {
    PublicKey::from_base64url_named("public key", encoded)
}

pub fn parse_private_key(encoded: &str) -> Result<PrivateKey, PushError> {
    let bytes = decode_base64url("private key", encoded)?;
    PrivateKey::from_bytes(&bytes)
}

pub(crate) fn parse_auth_secret(encoded: &str) -> Result<[u8; AUTH_SECRET_LENGTH], PushError> {
    let bytes = decode_base64url("auth", encoded)?;
    bytes.as_slice().try_into().map_err(|_| {
        PushError::InvalidKey(format!(
            "auth should be {AUTH_SECRET_LENGTH} bytes long when decoded, got {}",
            bytes.len()
        ))
    })
}

/// Decodes base64url with or without trailing `=` padding.
pub fn decode_base64url(field: &'static str, encoded: &str) -> Result<Vec<u8>, PushError> {
    let trimmed = encoded.trim().trim_end_matches('=');
    decode_config(trimmed, URL_SAFE_NO_PAD).map_err(|_| PushError::MalformedEncoding { field })
}

pub fn encode_base64url<T: AsRef<[u8]>>(bytes: T) -> String {
    encode_config(bytes, URL_SAFE_NO_PAD)
}

/// Freshly generated VAPID key pair, both halves base64url encoded.
#[derive(Debug, Clone)]
pub struct VapidKeyPair {
    pub private_key: String,
    pub public_key: String,
}

pub fn generate_vapid_credentials() -> VapidKeyPair {
    let mut rng = OsRng;
    generate_vapid_credentials_with_rng(&mut rng)
}

pub fn generate_vapid_credentials_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> VapidKeyPair {
    let private_key = generate_private_key_with_rng(rng);
    VapidKeyPair {
        public_key: private_key.public_key().to_base64url(),
        private_key: private_key.to_base64url(),
    }
}

fn generate_private_key_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> PrivateKey {
    let mut key_bytes = [0u8; PRIVATE_KEY_LENGTH];
    loop {
        rng.fill_bytes(&mut key_bytes);
        if let Ok(key) = PrivateKey::from_bytes(&key_bytes) {
            return key;
        }
    }
}
