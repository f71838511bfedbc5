pub mod adapters;
pub mod config;
pub mod error;
pub mod ports;
pub mod push;
pub mod subscriptions;
pub mod types;

pub use error::{DeliveryFailure, PushError};
pub use push::{
    DispatchResult, Dispatcher, DispatcherOptions, VapidCredentials, VapidKeyPair,
    generate_vapid_credentials,
};
pub use types::notification::{Direction, Notification, NotificationAction};
pub use types::subscription::{Principal, Subscription};
