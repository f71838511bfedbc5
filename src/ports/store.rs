use time::OffsetDateTime;

use crate::error::PushError;
use crate::types::subscription::Subscription;

/// Persistence for subscriptions, keyed by endpoint.
///
/// Every failure is reported as [`PushError::Storage`].
pub trait SubscriptionStore: Send + Sync {
    fn load_by_endpoint(&self, endpoint: &str) -> Result<Option<Subscription>, PushError>;

    /// Returns a new, unsaved subscription carrying a fresh id.
    fn create(&self, now: OffsetDateTime) -> Subscription;

    fn save(&self, subscription: &Subscription) -> Result<(), PushError>;

    fn delete(&self, subscriptions: &[Subscription]) -> Result<(), PushError>;

    fn list(&self) -> Result<Vec<Subscription>, PushError>;
}

impl<S: SubscriptionStore + ?Sized> SubscriptionStore for std::sync::Arc<S> {
    fn load_by_endpoint(&self, endpoint: &str) -> Result<Option<Subscription>, PushError> {
        (**self).load_by_endpoint(endpoint)
    }

    fn create(&self, now: OffsetDateTime) -> Subscription {
        (**self).create(now)
    }

    fn save(&self, subscription: &Subscription) -> Result<(), PushError> {
        (**self).save(subscription)
    }

    fn delete(&self, subscriptions: &[Subscription]) -> Result<(), PushError> {
        (**self).delete(subscriptions)
    }

    fn list(&self) -> Result<Vec<Subscription>, PushError> {
        (**self).list()
    }
}
