//! Message encryption for Web Push.
//!
//! `aes128gcm` follows RFC 8291 with the RFC 8188 record header. `aesgcm` is the
//! older draft scheme some browsers still register with; its salt and ephemeral
//! key travel in the `Encryption` and `Crypto-Key` headers instead of the body.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

use crate::error::PushError;
use crate::push::keys::{AUTH_SECRET_LENGTH, PUBLIC_KEY_LENGTH, PublicKey, encode_base64url};
use crate::types::push::ContentEncoding;

pub const RECORD_SIZE: u32 = 4096;
/// Largest plaintext that fits one record.
pub const MAX_PAYLOAD_LENGTH: usize = 4078;
/// Padding target that works with every push service.
pub const MAX_COMPATIBILITY_PAYLOAD_LENGTH: usize = 3052;

const SALT_LENGTH: usize = 16;
const KEY_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const IKM_LENGTH: usize = 32;
const LAST_RECORD_DELIMITER: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub encoding: ContentEncoding,
    pub ciphertext: Vec<u8>,
    pub salt: [u8; SALT_LENGTH],
    pub server_public_key: Vec<u8>,
    pub record_size: u32,
}

impl EncryptedMessage {
    /// The HTTP body; `aes128gcm` prefixes the record header.
    pub fn body(&self) -> Vec<u8> {
        match self.encoding {
            ContentEncoding::Aes128Gcm => {
                let mut body = Vec::with_capacity(
                    SALT_LENGTH + 4 + 1 + self.server_public_key.len() + self.ciphertext.len(),
                );
                body.extend_from_slice(&self.salt);
                body.extend_from_slice(&self.record_size.to_be_bytes());
                body.push(self.server_public_key.len() as u8);
                body.extend_from_slice(&self.server_public_key);
                body.extend_from_slice(&self.ciphertext);
                body
            }
            ContentEncoding::AesGcm => self.ciphertext.clone(),
        }
    }

    /// `Encryption` header for `aesgcm`.
    pub fn encryption_header(&self) -> Option<String> {
        match self.encoding {
            ContentEncoding::AesGcm => Some(format!("salt={}", encode_base64url(self.salt))),
            ContentEncoding::Aes128Gcm => None,
        }
    }

    /// `dh=` parameter of the `Crypto-Key` header for `aesgcm`.
    pub fn crypto_key_dh(&self) -> Option<String> {
        match self.encoding {
            ContentEncoding::AesGcm => {
                Some(format!("dh={}", encode_base64url(&self.server_public_key)))
            }
            ContentEncoding::Aes128Gcm => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PayloadEncryptor {
    pad_to: usize,
}

impl Default for PayloadEncryptor {
    fn default() -> Self {
        Self::new(MAX_COMPATIBILITY_PAYLOAD_LENGTH)
    }
}

impl PayloadEncryptor {
    /// Plaintexts shorter than `pad_to` are zero-padded up to it.
    pub fn new(pad_to: usize) -> Self {
        Self {
            pad_to: pad_to.min(MAX_PAYLOAD_LENGTH),
        }
    }

    pub fn encrypt(
        &self,
        payload: &[u8],
        receiver_key: &PublicKey,
        auth_secret: &[u8; AUTH_SECRET_LENGTH],
        encoding: ContentEncoding,
    ) -> Result<EncryptedMessage, PushError> {
        let mut rng = OsRng;
        self.encrypt_with_rng(payload, receiver_key, auth_secret, encoding, &mut rng)
    }

    pub fn encrypt_with_rng<R: RngCore + CryptoRng>(
        &self,
        payload: &[u8],
        receiver_key: &PublicKey,
        auth_secret: &[u8; AUTH_SECRET_LENGTH],
        encoding: ContentEncoding,
        rng: &mut R,
    ) -> Result<EncryptedMessage, PushError> {
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(PushError::InvalidArgument(format!(
                "payload is {} bytes, at most {MAX_PAYLOAD_LENGTH} can be sent",
                payload.len()
            )));
        }

        let server_secret = p256::SecretKey::random(rng);
        let mut salt = [0u8; SALT_LENGTH];
        rng.fill_bytes(&mut salt);
        self.seal(payload, receiver_key, auth_secret, encoding, &server_secret, salt)
    }

    fn seal(
        &self,
        payload: &[u8],
        receiver_key: &PublicKey,
        auth_secret: &[u8; AUTH_SECRET_LENGTH],
        encoding: ContentEncoding,
        server_secret: &p256::SecretKey,
        salt: [u8; SALT_LENGTH],
    ) -> Result<EncryptedMessage, PushError> {
        let server_public_key = server_secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let shared = diffie_hellman(
            server_secret.to_nonzero_scalar(),
            receiver_key.as_p256().as_affine(),
        );
        let receiver_public_key = receiver_key.to_bytes();

        let keys = derive_keys(
            encoding,
            shared.raw_secret_bytes(),
            auth_secret,
            &receiver_public_key,
            &server_public_key,
            &salt,
        )?;
        let padding = self.pad_to.saturating_sub(payload.len());
        let record = pad(encoding, payload, padding);

        let cipher =
            Aes128Gcm::new_from_slice(&keys.content_key).map_err(|_| PushError::Encryption)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&keys.nonce), record.as_slice())
            .map_err(|_| PushError::Encryption)?;

        Ok(EncryptedMessage {
            encoding,
            ciphertext,
            salt,
            server_public_key,
            record_size: RECORD_SIZE,
        })
    }
}

struct ContentKeys {
    content_key: [u8; KEY_LENGTH],
    nonce: [u8; NONCE_LENGTH],
}

fn derive_keys(
    encoding: ContentEncoding,
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    receiver_public_key: &[u8],
    server_public_key: &[u8],
    salt: &[u8],
) -> Result<ContentKeys, PushError> {
    let mut ikm = [0u8; IKM_LENGTH];
    let mut content_key = [0u8; KEY_LENGTH];
    let mut nonce = [0u8; NONCE_LENGTH];

    match encoding {
        ContentEncoding::Aes128Gcm => {
            let key_info = [
                b"WebPush: info\0".as_slice(),
                receiver_public_key,
                server_public_key,
            ]
            .concat();
            hkdf(auth_secret, ecdh_secret, &key_info, &mut ikm)?;
            hkdf(salt, &ikm, b"Content-Encoding: aes128gcm\0", &mut content_key)?;
            hkdf(salt, &ikm, b"Content-Encoding: nonce\0", &mut nonce)?;
        }
        ContentEncoding::AesGcm => {
            hkdf(auth_secret, ecdh_secret, b"Content-Encoding: auth\0", &mut ikm)?;
            let context = aesgcm_context(receiver_public_key, server_public_key);
            let key_info = [b"Content-Encoding: aesgcm\0".as_slice(), context.as_slice()].concat();
            let nonce_info = [b"Content-Encoding: nonce\0".as_slice(), context.as_slice()].concat();
            hkdf(salt, &ikm, &key_info, &mut content_key)?;
            hkdf(salt, &ikm, &nonce_info, &mut nonce)?;
        }
    }

    Ok(ContentKeys { content_key, nonce })
}

fn aesgcm_context(receiver_public_key: &[u8], server_public_key: &[u8]) -> Vec<u8> {
    let mut context = Vec::with_capacity(6 + 2 * (2 + PUBLIC_KEY_LENGTH));
    context.extend_from_slice(b"P-256\0");
    for key in [receiver_public_key, server_public_key] {
        context.extend_from_slice(&(key.len() as u16).to_be_bytes());
        context.extend_from_slice(key);
    }
    context
}

fn hkdf(salt: &[u8], ikm: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), PushError> {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, okm)
        .map_err(|_| PushError::Encryption)
}

fn pad(encoding: ContentEncoding, payload: &[u8], padding: usize) -> Vec<u8> {
    match encoding {
        ContentEncoding::Aes128Gcm => {
            let mut record = Vec::with_capacity(payload.len() + 1 + padding);
            record.extend_from_slice(payload);
            record.push(LAST_RECORD_DELIMITER);
            record.resize(payload.len() + 1 + padding, 0);
            record
        }
        ContentEncoding::AesGcm => {
            let mut record = Vec::with_capacity(2 + padding + payload.len());
            record.extend_from_slice(&(padding as u16).to_be_bytes());
            record.resize(2 + padding, 0);
            record.extend_from_slice(payload);
            record
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    pub(crate) struct Receiver {
        pub(crate) secret: p256::SecretKey,
        pub(crate) public_key: PublicKey,
        pub(crate) auth: [u8; AUTH_SECRET_LENGTH],
    }

    impl Receiver {
        pub(crate) fn generate(rng: &mut StdRng) -> Self {
            let secret = p256::SecretKey::random(rng);
            let public_bytes = secret.public_key().to_encoded_point(false);
            let public_key = PublicKey::from_bytes(public_bytes.as_bytes()).expect("receiver key");
            let mut auth = [0u8; AUTH_SECRET_LENGTH];
            rng.fill_bytes(&mut auth);
            Self {
                secret,
                public_key,
                auth,
            }
        }

        pub(crate) fn p256dh(&self) -> String {
            self.public_key.to_base64url()
        }

        pub(crate) fn auth_b64(&self) -> String {
            encode_base64url(self.auth)
        }

        /// Reverses `aes128gcm` bodies, or `aesgcm` bodies given salt and dh key.
        pub(crate) fn decrypt(
            &self,
            encoding: ContentEncoding,
            body: &[u8],
            aesgcm_params: Option<([u8; SALT_LENGTH], Vec<u8>)>,
        ) -> Vec<u8> {
            let (salt, server_public_key, ciphertext) = match (encoding, aesgcm_params) {
                (ContentEncoding::Aes128Gcm, _) => {
                    let mut salt = [0u8; SALT_LENGTH];
                    salt.copy_from_slice(&body[..SALT_LENGTH]);
                    let record_size =
                        u32::from_be_bytes(body[SALT_LENGTH..SALT_LENGTH + 4].try_into().unwrap());
                    assert_eq!(record_size, RECORD_SIZE);
                    let id_len = body[SALT_LENGTH + 4] as usize;
                    let key_start = SALT_LENGTH + 5;
                    let key = body[key_start..key_start + id_len].to_vec();
                    (salt, key, body[key_start + id_len..].to_vec())
                }
                (ContentEncoding::AesGcm, Some((salt, key))) => (salt, key, body.to_vec()),
                (ContentEncoding::AesGcm, None) => panic!("aesgcm needs salt and dh"),
            };

            let server_key = p256::PublicKey::from_sec1_bytes(&server_public_key).expect("dh key");
            let shared =
                diffie_hellman(self.secret.to_nonzero_scalar(), server_key.as_affine());
            let keys = derive_keys(
                encoding,
                shared.raw_secret_bytes(),
                &self.auth,
                &self.public_key.to_bytes(),
                &server_public_key,
                &salt,
            )
            .expect("derive keys");
            let cipher = Aes128Gcm::new_from_slice(&keys.content_key).expect("cipher");
            let record = cipher
                .decrypt(Nonce::from_slice(&keys.nonce), ciphertext.as_slice())
                .expect("decrypt");

            match encoding {
                ContentEncoding::Aes128Gcm => {
                    let end = record
                        .iter()
                        .rposition(|byte| *byte == LAST_RECORD_DELIMITER)
                        .expect("delimiter");
                    assert!(record[end + 1..].iter().all(|byte| *byte == 0));
                    record[..end].to_vec()
                }
                ContentEncoding::AesGcm => {
                    let padding = u16::from_be_bytes([record[0], record[1]]) as usize;
                    assert!(record[2..2 + padding].iter().all(|byte| *byte == 0));
                    record[2 + padding..].to_vec()
                }
            }
        }
    }

    const VECTOR_PLAINTEXT: &[u8] = b"When I grow up, I want to be a watermelon";
    const VECTOR_SERVER_PRIVATE_KEY: &str = "yfWPiYE-n46HLnH0KqZOF1fJJU3MYrct3AELtAQ-oRw";
    const VECTOR_RECEIVER_PUBLIC_KEY: &str =
        "BCVxsr7N_eNgVRqvHtD0zTZsEc6-VV-JvLexhqUzORcxaOzi6-AYWXvTBHm4bjyPjs7Vd8pZGH6SRpkNtoIAiw4";
    const VECTOR_SALT: &str = "DGv6ra1nlYgDCS1FRnbzlw";
    const VECTOR_AUTH: &str = "BTBZMqHH6r4Tts7J_aSIgg";

    fn seal_vector(encoding: ContentEncoding) -> EncryptedMessage {
        let decode =
            |value: &str| crate::push::keys::decode_base64url("vector", value).expect("base64");
        let server_secret =
            p256::SecretKey::from_slice(&decode(VECTOR_SERVER_PRIVATE_KEY)).expect("server key");
        let receiver_key =
            crate::push::keys::parse_public_key(VECTOR_RECEIVER_PUBLIC_KEY).expect("receiver key");
        let salt: [u8; SALT_LENGTH] = decode(VECTOR_SALT).try_into().expect("salt");
        let auth: [u8; AUTH_SECRET_LENGTH] = decode(VECTOR_AUTH).try_into().expect("auth");
        PayloadEncryptor::new(0)
            .seal(
                VECTOR_PLAINTEXT,
                &receiver_key,
                &auth,
                encoding,
                &server_secret,
                salt,
            )
            .expect("seal")
    }

    // RFC 8291, Appendix A.
    #[test]
    fn seal__should_match_aes128gcm_known_answer() {
        // When
        let message = seal_vector(ContentEncoding::Aes128Gcm);

        // Then
        assert_eq!(
            encode_base64url(message.body()),
            "DGv6ra1nlYgDCS1FRnbzlwAAEABBBP4z9KsN6nGRTbVYI_c7VJSPQTBtkgcy27mlmlMoZIIgDll6e3vCYLocInmYWAmS6TlzAC8wEqKK6PBru3jl7A_yl95bQpu6cVPTpK4Mqgkf1CXztLVBSt2Ks3oZwbuwXPXLWyouBWLVWGNWQexSgSxsj_Qulcy4a-fN"
        );
    }

    #[test]
    fn derive_keys__should_match_aes128gcm_known_answer() {
        // Given
        let message = seal_vector(ContentEncoding::Aes128Gcm);
        let receiver_key =
            crate::push::keys::parse_public_key(VECTOR_RECEIVER_PUBLIC_KEY).expect("receiver key");
        let ecdh_secret = crate::push::keys::decode_base64url(
            "ecdh",
            "kyrL1jIIOHEzg3sM2ZWRHDRB62YACZhhSlknJ672kSs",
        )
        .expect("ecdh");
        let auth = crate::push::keys::decode_base64url("auth", VECTOR_AUTH).expect("auth");

        // When
        let keys = derive_keys(
            ContentEncoding::Aes128Gcm,
            &ecdh_secret,
            &auth,
            &receiver_key.to_bytes(),
            &message.server_public_key,
            &message.salt,
        )
        .expect("derive keys");

        // Then
        assert_eq!(encode_base64url(keys.content_key), "oIhVW04MRdy2XN9CiKLxTg");
        assert_eq!(encode_base64url(keys.nonce), "4h_95klXJ5E_qnoN");
    }

    // Same inputs through the draft-04 `aesgcm` scheme, computed independently.
    #[test]
    fn seal__should_match_aesgcm_known_answer() {
        // When
        let message = seal_vector(ContentEncoding::AesGcm);

        // Then
        assert_eq!(
            encode_base64url(message.body()),
            "4qwOLFm_mNy0vf1A8f3Bm6B5UD15y3aV_xZy14pixUhcPTIoZKHzq5i3dZ6PzqSMxBI_-VDUZ4jW04M"
        );
        assert_eq!(
            message.encryption_header().as_deref(),
            Some("salt=DGv6ra1nlYgDCS1FRnbzlw")
        );
        assert_eq!(
            message.crypto_key_dh().as_deref(),
            Some("dh=BP4z9KsN6nGRTbVYI_c7VJSPQTBtkgcy27mlmlMoZIIgDll6e3vCYLocInmYWAmS6TlzAC8wEqKK6PBru3jl7A8")
        );
    }

    fn round_trip(encoding: ContentEncoding, encryptor: PayloadEncryptor, payload: &[u8]) {
        // Given
        let mut rng = StdRng::from_seed([3u8; 32]);
        let receiver = Receiver::generate(&mut rng);

        // When
        let message = encryptor
            .encrypt_with_rng(payload, &receiver.public_key, &receiver.auth, encoding, &mut rng)
            .expect("encrypt");
        let params = (encoding == ContentEncoding::AesGcm)
            .then(|| (message.salt, message.server_public_key.clone()));
        let decrypted = receiver.decrypt(encoding, &message.body(), params);

        // Then
        assert_eq!(decrypted, payload);
    }

    #[test]
    fn encrypt__should_round_trip_aes128gcm() {
        round_trip(
            ContentEncoding::Aes128Gcm,
            PayloadEncryptor::default(),
            br#"{"title":"Hello"}"#,
        );
    }

    #[test]
    fn encrypt__should_round_trip_aesgcm() {
        round_trip(
            ContentEncoding::AesGcm,
            PayloadEncryptor::default(),
            br#"{"title":"Hello"}"#,
        );
    }

    #[test]
    fn encrypt__should_round_trip_without_padding_and_at_max_length() {
        round_trip(ContentEncoding::Aes128Gcm, PayloadEncryptor::new(0), b"x");
        round_trip(
            ContentEncoding::AesGcm,
            PayloadEncryptor::new(0),
            &vec![7u8; MAX_PAYLOAD_LENGTH],
        );
        round_trip(
            ContentEncoding::Aes128Gcm,
            PayloadEncryptor::default(),
            &vec![7u8; MAX_PAYLOAD_LENGTH],
        );
    }

    #[test]
    fn encrypt__should_pad_to_compatibility_length() {
        // Given
        let mut rng = StdRng::from_seed([5u8; 32]);
        let receiver = Receiver::generate(&mut rng);

        // When
        let message = PayloadEncryptor::default()
            .encrypt_with_rng(
                b"hi",
                &receiver.public_key,
                &receiver.auth,
                ContentEncoding::Aes128Gcm,
                &mut rng,
            )
            .expect("encrypt");

        // Then
        assert_eq!(message.ciphertext.len(), MAX_COMPATIBILITY_PAYLOAD_LENGTH + 1 + 16);
        assert_eq!(message.server_public_key.len(), PUBLIC_KEY_LENGTH);
        assert_eq!(message.body().len(), 16 + 4 + 1 + 65 + message.ciphertext.len());
        assert_eq!(message.encryption_header(), None);
    }

    #[test]
    fn encrypt__should_expose_aesgcm_headers() {
        // Given
        let mut rng = StdRng::from_seed([5u8; 32]);
        let receiver = Receiver::generate(&mut rng);

        // When
        let message = PayloadEncryptor::new(0)
            .encrypt_with_rng(
                b"hi",
                &receiver.public_key,
                &receiver.auth,
                ContentEncoding::AesGcm,
                &mut rng,
            )
            .expect("encrypt");

        // Then
        assert_eq!(
            message.encryption_header(),
            Some(format!("salt={}", encode_base64url(message.salt)))
        );
        assert_eq!(
            message.crypto_key_dh(),
            Some(format!("dh={}", encode_base64url(&message.server_public_key)))
        );
        assert_eq!(message.body(), message.ciphertext);
        assert_eq!(message.ciphertext.len(), 2 + 2 + 16);
    }

    #[test]
    fn encrypt__should_use_fresh_salt_and_key_per_message() {
        // Given
        let mut rng = StdRng::from_seed([9u8; 32]);
        let receiver = Receiver::generate(&mut rng);
        let encryptor = PayloadEncryptor::default();

        // When
        let first = encryptor
            .encrypt(b"same", &receiver.public_key, &receiver.auth, ContentEncoding::Aes128Gcm)
            .expect("encrypt");
        let second = encryptor
            .encrypt(b"same", &receiver.public_key, &receiver.auth, ContentEncoding::Aes128Gcm)
            .expect("encrypt");

        // Then
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.server_public_key, second.server_public_key);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn encrypt__should_reject_oversized_payload() {
        // Given
        let mut rng = StdRng::from_seed([1u8; 32]);
        let receiver = Receiver::generate(&mut rng);

        // When
        let result = PayloadEncryptor::default().encrypt(
            &vec![0u8; MAX_PAYLOAD_LENGTH + 1],
            &receiver.public_key,
            &receiver.auth,
            ContentEncoding::Aes128Gcm,
        );

        // Then
        assert!(matches!(result, Err(PushError::InvalidArgument(_))));
    }
}
