//! Registration endpoint logic: create, update or remove a subscription from a
//! browser-supplied JSON body. Transport-agnostic; every outcome is a
//! [`SubscriptionResponse`] that the caller renders with HTTP 200.

use serde::Serialize;
use serde_json::Value;

use crate::error::PushError;
use crate::ports::{SubscriptionStore, TimeProvider};
use crate::types::subscription::{Principal, Subscription, SubscriptionChanges};

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMethod {
    Post,
    Patch,
    Delete,
}

impl std::str::FromStr for SubscriptionMethod {
    type Err = PushError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "POST" => Ok(SubscriptionMethod::Post),
            "PATCH" => Ok(SubscriptionMethod::Patch),
            "DELETE" => Ok(SubscriptionMethod::Delete),
            other => Err(PushError::InvalidArgument(format!(
                "method not allowed: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionResponse {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl SubscriptionResponse {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }
}

pub struct SubscriptionHandler<S, T> {
    store: S,
    time: T,
}

impl<S, T> SubscriptionHandler<S, T>
where
    S: SubscriptionStore,
    T: TimeProvider,
{
    pub fn new(store: S, time: T) -> Self {
        Self { store, time }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn handle(
        &self,
        principal: Principal,
        method: SubscriptionMethod,
        content_type: Option<&str>,
        body: &str,
    ) -> SubscriptionResponse {
        let mut errors = Vec::new();
        if !is_json(content_type) {
            errors.push(format!(
                "The \"Content-Type\" header must be \"{JSON_CONTENT_TYPE}\"."
            ));
        }

        let body = parse_body(body);
        let changes = SubscriptionChanges::from_json(&body);
        let endpoint = match changes.endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => endpoint,
            _ => {
                errors.push("The \"endpoint\" must not be empty.".to_string());
                return SubscriptionResponse::from_errors(errors);
            }
        };
        if !errors.is_empty() {
            return SubscriptionResponse::from_errors(errors);
        }

        let existing = match self.store.load_by_endpoint(endpoint) {
            Ok(existing) => existing,
            Err(err) => {
                log::error!("failed to load push subscription: {err}");
                return SubscriptionResponse::from_errors(vec![storage_message(method).to_string()]);
            }
        };

        let errors = match method {
            SubscriptionMethod::Delete => self.delete(existing),
            SubscriptionMethod::Post | SubscriptionMethod::Patch => {
                self.manage(existing, &changes, principal)
            }
        };
        SubscriptionResponse::from_errors(errors)
    }

    fn manage(
        &self,
        existing: Option<Subscription>,
        changes: &SubscriptionChanges,
        principal: Principal,
    ) -> Vec<String> {
        let now = self.time.now();
        let mut subscription = existing.unwrap_or_else(|| self.store.create(now));
        subscription.merge(changes, principal, now);

        let mut violations = subscription.validate();
        for rejected in &changes.rejected {
            match violations
                .iter_mut()
                .find(|violation| violation.property == rejected.property)
            {
                Some(violation) => *violation = rejected.clone(),
                None => violations.push(rejected.clone()),
            }
        }
        if !violations.is_empty() {
            return violations.iter().map(ToString::to_string).collect();
        }

        match self.store.save(&subscription) {
            Ok(()) => {
                log::debug!("saved push subscription {}", subscription.id);
                Vec::new()
            }
            Err(err) => {
                log::error!("failed to save push subscription: {err}");
                vec![storage_message(SubscriptionMethod::Post).to_string()]
            }
        }
    }

    fn delete(&self, existing: Option<Subscription>) -> Vec<String> {
        let Some(subscription) = existing else {
            return Vec::new();
        };
        match self.store.delete(std::slice::from_ref(&subscription)) {
            Ok(()) => {
                log::debug!("deleted push subscription {}", subscription.id);
                Vec::new()
            }
            Err(err) => {
                log::error!("failed to delete push subscription: {err}");
                vec![storage_message(SubscriptionMethod::Delete).to_string()]
            }
        }
    }
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
}

/// Empty or unparseable bodies read as an empty object.
fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or(Value::Null)
}

fn storage_message(method: SubscriptionMethod) -> &'static str {
    match method {
        SubscriptionMethod::Delete => "Unable to delete the subscription.",
        SubscriptionMethod::Post | SubscriptionMethod::Patch => "Unable to save the subscription.",
    }
}
