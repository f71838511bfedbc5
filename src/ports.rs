pub mod push;
pub mod store;
pub mod time;

pub use push::{PushRequest, PushResponse, PushTransport, TransportError};
pub use store::SubscriptionStore;
pub use time::TimeProvider;
