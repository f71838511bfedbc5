use crate::adapters::{ReqwestTransport, SystemTimeProvider};
use crate::config;
use crate::error::PushError;
use crate::ports::{self, SubscriptionStore};

pub mod dispatcher;
pub mod encryption;
pub mod keys;
pub mod vapid;

pub use dispatcher::{DispatchResult, Dispatcher, DispatcherOptions, MessageOptions};
pub use encryption::{EncryptedMessage, PayloadEncryptor};
pub use keys::{VapidKeyPair, generate_vapid_credentials};
pub use vapid::{
    SignedVapid, SignerOptions, VapidConfigStatus, VapidCredentials, VapidSigner,
    load_vapid_config,
};

pub type WebPushDispatcher = Dispatcher<ReqwestTransport, SystemTimeProvider>;

/// `Ok(None)` when push is not configured at all, or only partially.
pub fn build_dispatcher(
    config: &config::AppConfig,
) -> Result<Option<WebPushDispatcher>, PushError> {
    let vapid = match load_vapid_config(config) {
        VapidConfigStatus::Ready(vapid) => vapid,
        VapidConfigStatus::Incomplete => {
            log::warn!("push notifications disabled: incomplete VAPID configuration");
            return Ok(None);
        }
        VapidConfigStatus::Missing => {
            return Ok(None);
        }
    };

    let credentials = VapidCredentials::from_config(&vapid)?;
    let transport = ReqwestTransport::new(config.timeout())?;
    Dispatcher::new(
        credentials,
        transport,
        SystemTimeProvider,
        config.dispatcher_options(),
    )
    .map(Some)
}

/// Sends `payload` to every stored subscription.
pub async fn send_to_all<S, T>(
    store: &dyn SubscriptionStore,
    dispatcher: &Dispatcher<S, T>,
    payload: &[u8],
) -> Result<Vec<DispatchResult>, PushError>
where
    S: ports::PushTransport,
    T: ports::TimeProvider,
{
    let subscriptions = store.list()?;
    if subscriptions.is_empty() {
        log::info!("no push subscriptions stored");
    }
    Ok(dispatcher.send_batch(&subscriptions, payload).await)
}

/// Deletes subscriptions the push service reported as gone. Returns how many
/// were removed; storage failures are logged and leave the store untouched.
pub fn prune_expired(store: &dyn SubscriptionStore, results: &[DispatchResult]) -> usize {
    let mut expired = Vec::new();
    for result in results.iter().filter(|result| result.subscription_expired) {
        match store.load_by_endpoint(&result.endpoint) {
            Ok(Some(subscription)) if subscription.id == result.subscription_id => {
                expired.push(subscription)
            }
            Ok(_) => {}
            Err(err) => log::error!("failed to load expired subscription: {err}"),
        }
    }
    if expired.is_empty() {
        return 0;
    }

    match store.delete(&expired) {
        Ok(()) => {
            log::info!("pruned {} expired push subscriptions", expired.len());
            expired.len()
        }
        Err(err) => {
            log::error!("failed to delete expired subscriptions: {err}");
            0
        }
    }
}
