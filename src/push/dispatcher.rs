use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{DeliveryFailure, PushError};
use crate::ports::{self, PushRequest, PushResponse};
use crate::push::encryption::{MAX_COMPATIBILITY_PAYLOAD_LENGTH, PayloadEncryptor};
use crate::push::vapid::{self, SignerOptions, VapidCredentials, VapidSigner};
use crate::types::push::{ContentEncoding, Urgency};
use crate::types::subscription::Subscription;

/// Four weeks, the longest most push services keep a message.
pub const DEFAULT_TTL: u32 = 2_419_200;
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;
const MAX_TOPIC_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOptions {
    pub ttl: u32,
    pub urgency: Option<Urgency>,
    pub topic: Option<String>,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            urgency: None,
            topic: None,
        }
    }
}

impl MessageOptions {
    fn validate(&self) -> Result<(), PushError> {
        if let Some(topic) = &self.topic {
            let valid_chars = topic
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
            if topic.is_empty() || topic.len() > MAX_TOPIC_LENGTH || !valid_chars {
                return Err(PushError::InvalidArgument(format!(
                    "topic must be 1-{MAX_TOPIC_LENGTH} base64url characters, got '{topic}'"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub max_concurrency: usize,
    pub padding: usize,
    pub message: MessageOptions,
    pub signer: SignerOptions,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            padding: MAX_COMPATIBILITY_PAYLOAD_LENGTH,
            message: MessageOptions::default(),
            signer: SignerOptions::default(),
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub subscription_id: u64,
    pub endpoint: String,
    pub success: bool,
    pub http_status: Option<u16>,
    pub should_retry: bool,
    pub subscription_expired: bool,
    pub retry_after: Option<String>,
    pub error: Option<PushError>,
}

impl DispatchResult {
    fn delivered(subscription: &Subscription, status: u16) -> Self {
        Self {
            subscription_id: subscription.id,
            endpoint: subscription.endpoint.clone(),
            success: true,
            http_status: Some(status),
            should_retry: false,
            subscription_expired: false,
            retry_after: None,
            error: None,
        }
    }

    fn failed(subscription: &Subscription, error: PushError) -> Self {
        let kind = error.delivery_failure();
        Self {
            subscription_id: subscription.id,
            endpoint: subscription.endpoint.clone(),
            success: false,
            http_status: None,
            should_retry: matches!(
                error,
                PushError::Transport(_) | PushError::Cancelled
            ) || kind == Some(DeliveryFailure::Retryable),
            subscription_expired: kind == Some(DeliveryFailure::Expired),
            retry_after: None,
            error: Some(error),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Signs, encrypts and posts notifications to push services.
pub struct Dispatcher<S, T> {
    transport: S,
    signer: VapidSigner<T>,
    encryptor: PayloadEncryptor,
    max_concurrency: usize,
    message: MessageOptions,
}

impl<S, T> Dispatcher<S, T>
where
    S: ports::PushTransport,
    T: ports::TimeProvider,
{
    pub fn new(
        credentials: VapidCredentials,
        transport: S,
        time: T,
        options: DispatcherOptions,
    ) -> Result<Self, PushError> {
        if options.max_concurrency == 0 {
            return Err(PushError::InvalidArgument(
                "max concurrency must be at least 1".to_string(),
            ));
        }
        options.message.validate()?;
        Ok(Self {
            transport,
            signer: VapidSigner::new(credentials, time, options.signer)?,
            encryptor: PayloadEncryptor::new(options.padding),
            max_concurrency: options.max_concurrency,
            message: options.message,
        })
    }

    pub fn public_key(&self) -> String {
        self.signer.credentials().public_key().to_base64url()
    }

    /// An empty payload is sent unencrypted, as a bare authenticated POST.
    pub async fn send(&self, subscription: &Subscription, payload: &[u8]) -> DispatchResult {
        let request = match self.build_request(subscription, payload) {
            Ok(request) => request,
            Err(err) => {
                log::warn!(
                    "push delivery skipped: {} (subscription {})",
                    err,
                    subscription.id
                );
                return DispatchResult::failed(subscription, err);
            }
        };

        match self.transport.post(request).await {
            Ok(response) => classify(subscription, response),
            Err(err) => {
                log::warn!(
                    "push delivery error: {} (subscription {})",
                    err,
                    subscription.id
                );
                DispatchResult::failed(subscription, PushError::Transport(err.to_string()))
            }
        }
    }

    /// One result per subscription, in input order.
    pub async fn send_batch(
        &self,
        subscriptions: &[Subscription],
        payload: &[u8],
    ) -> Vec<DispatchResult> {
        stream::iter(subscriptions)
            .map(|subscription| self.send(subscription, payload))
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Like [`Self::send_batch`]; sends still pending when `token` fires
    /// are abandoned and reported as retryable [`PushError::Cancelled`].
    pub async fn send_batch_with_cancel(
        &self,
        subscriptions: &[Subscription],
        payload: &[u8],
        token: &CancellationToken,
    ) -> Vec<DispatchResult> {
        stream::iter(subscriptions)
            .map(|subscription| async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        DispatchResult::failed(subscription, PushError::Cancelled)
                    }
                    result = self.send(subscription, payload) => result,
                }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    fn build_request(
        &self,
        subscription: &Subscription,
        payload: &[u8],
    ) -> Result<PushRequest, PushError> {
        let encoding = subscription.encoding()?;
        let audience = vapid::audience_origin(&subscription.endpoint)?;

        let mut headers = vec![("TTL", self.message.ttl.to_string())];
        if let Some(urgency) = self.message.urgency {
            headers.push(("Urgency", urgency.as_str().to_string()));
        }
        if let Some(topic) = &self.message.topic {
            headers.push(("Topic", topic.clone()));
        }

        let mut crypto_key = Vec::new();
        let body = if payload.is_empty() {
            headers.push(("Content-Length", "0".to_string()));
            Vec::new()
        } else {
            let receiver_key = subscription.receiver_key()?;
            let auth_secret = subscription.auth_secret()?;
            let message = self
                .encryptor
                .encrypt(payload, &receiver_key, &auth_secret, encoding)?;
            headers.push(("Content-Type", "application/octet-stream".to_string()));
            headers.push(("Content-Encoding", encoding.as_str().to_string()));
            if let Some(encryption) = message.encryption_header() {
                headers.push(("Encryption", encryption));
            }
            if let Some(dh) = message.crypto_key_dh() {
                crypto_key.push(dh);
            }
            message.body()
        };

        let signed = self.signer.sign(&audience)?;
        headers.push(("Authorization", signed.authorization_header(encoding)));
        if encoding == ContentEncoding::AesGcm {
            crypto_key.push(signed.crypto_key_header());
        }
        if !crypto_key.is_empty() {
            headers.push(("Crypto-Key", crypto_key.join(";")));
        }

        Ok(PushRequest {
            endpoint: subscription.endpoint.clone(),
            headers,
            body,
        })
    }
}

fn classify(subscription: &Subscription, response: PushResponse) -> DispatchResult {
    let status = response.status;
    if (200..300).contains(&status) {
        return DispatchResult::delivered(subscription, status);
    }

    let kind = match status {
        404 | 410 => DeliveryFailure::Expired,
        429 | 500..=599 => DeliveryFailure::Retryable,
        _ => DeliveryFailure::Permanent,
    };
    let body = response.body.trim();
    let message = if body.is_empty() {
        format!("push service responded with HTTP {status}")
    } else {
        format!("push service responded with HTTP {status}: {body}")
    };
    match kind {
        DeliveryFailure::Expired => log::info!(
            "push subscription expired (HTTP {status}, subscription {})",
            subscription.id
        ),
        _ => log::warn!("push delivery error: {message} (subscription {})", subscription.id),
    }

    let mut result =
        DispatchResult::failed(subscription, PushError::DeliveryFailed { kind, message });
    result.http_status = Some(status);
    if kind == DeliveryFailure::Retryable {
        result.retry_after = response.retry_after;
    }
    result
}
