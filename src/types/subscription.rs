use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};

use crate::error::PushError;
use crate::push::keys::{self, AUTH_SECRET_LENGTH, PublicKey};
use crate::types::push::{ContentEncoding, MAX_CONTENT_ENCODING_LENGTH};

/// Who is registering or updating a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User(u64),
}

/// A browser push registration, unique by `endpoint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: u64,
    pub endpoint: String,
    pub p256dh: Option<String>,
    pub auth: Option<String>,
    pub content_encoding: Option<String>,
    pub user_agent: Option<String>,
    pub utc_offset: Option<UtcOffset>,
    pub owner: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub property: &'static str,
    pub message: String,
}

impl ValidationError {
    fn not_null(property: &'static str) -> Self {
        Self {
            property,
            message: "This value should not be null.".to_string(),
        }
    }

    fn wrong_type(property: &'static str) -> Self {
        Self {
            property,
            message: "This value should be of the correct primitive type.".to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.property, self.message)
    }
}

/// The whitelisted fields a registration request may change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionChanges {
    pub endpoint: Option<String>,
    pub p256dh: Option<String>,
    pub auth: Option<String>,
    pub content_encoding: Option<String>,
    pub user_agent: Option<String>,
    pub utc_offset: Option<UtcOffset>,
    /// Fields that were present but held a value of the wrong type.
    pub rejected: Vec<ValidationError>,
}

impl SubscriptionChanges {
    /// Reads a JSON request body. Unknown keys (including any owner id) are ignored.
    pub fn from_json(body: &Value) -> Self {
        let mut changes = SubscriptionChanges::default();
        let Some(object) = body.as_object() else {
            return changes;
        };

        changes.endpoint = string_field(object.get("endpoint"), "endpoint", &mut changes.rejected);
        changes.user_agent =
            string_field(object.get("user_agent"), "user_agent", &mut changes.rejected);
        changes.content_encoding =
            string_field(object.get("encoding"), "encoding", &mut changes.rejected);
        changes.p256dh = string_field(object.get("p256dh"), "p256dh", &mut changes.rejected);
        changes.auth = string_field(object.get("auth"), "auth", &mut changes.rejected);
        changes.utc_offset = match object.get("utc_offset") {
            None | Some(Value::Null) => None,
            Some(value) => {
                let offset = value.as_f64().and_then(offset_from_timezone_hours);
                if offset.is_none() {
                    changes
                        .rejected
                        .push(ValidationError::wrong_type("utc_offset"));
                }
                offset
            }
        };
        changes
    }
}

fn string_field(
    value: Option<&Value>,
    property: &'static str,
    rejected: &mut Vec<ValidationError>,
) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value.clone()),
        Some(_) => {
            rejected.push(ValidationError::wrong_type(property));
            None
        }
    }
}

/// Browsers report `getTimezoneOffset()` with the sign inverted, in hours here.
fn offset_from_timezone_hours(hours: f64) -> Option<UtcOffset> {
    if !hours.is_finite() {
        return None;
    }
    let seconds = (-hours * 3600.0).round();
    if seconds.abs() > i32::MAX as f64 {
        return None;
    }
    UtcOffset::from_whole_seconds(seconds as i32).ok()
}

/// Formats an offset as a timezone name such as `+04:00`.
pub fn timezone_name(offset: UtcOffset) -> String {
    let (hours, minutes, _) = offset.as_hms();
    let sign = if offset.is_negative() { '-' } else { '+' };
    format!("{sign}{:02}:{:02}", hours.unsigned_abs(), minutes.unsigned_abs())
}

impl Subscription {
    pub fn new(id: u64, now: OffsetDateTime) -> Self {
        Self {
            id,
            endpoint: String::new(),
            p256dh: None,
            auth: None,
            content_encoding: None,
            user_agent: None,
            utc_offset: None,
            owner: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies supplied fields only. The owner can be upgraded from anonymous
    /// to a user but is never cleared or handed to a different user.
    pub fn merge(
        &mut self,
        changes: &SubscriptionChanges,
        principal: Principal,
        now: OffsetDateTime,
    ) {
        if let Some(endpoint) = &changes.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(p256dh) = &changes.p256dh {
            self.p256dh = Some(p256dh.clone());
        }
        if let Some(auth) = &changes.auth {
            self.auth = Some(auth.clone());
        }
        if let Some(encoding) = &changes.content_encoding {
            self.content_encoding = Some(encoding.clone());
        }
        if let Some(user_agent) = &changes.user_agent {
            self.user_agent = Some(user_agent.clone());
        }
        if let Some(offset) = changes.utc_offset {
            self.utc_offset = Some(offset);
        }
        if let (None, Principal::User(id)) = (self.owner, principal) {
            self.owner = Some(id);
        }
        self.updated_at = now;
    }

    /// Every violation, in field order.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.endpoint.trim().is_empty() {
            errors.push(ValidationError::not_null("endpoint"));
        }
        if self.user_agent.is_none() {
            errors.push(ValidationError::not_null("user_agent"));
        }
        match &self.content_encoding {
            None => errors.push(ValidationError::not_null("encoding")),
            Some(encoding) if encoding.chars().count() > MAX_CONTENT_ENCODING_LENGTH => {
                errors.push(ValidationError {
                    property: "encoding",
                    message: format!(
                        "Content encoding: may not be longer than {MAX_CONTENT_ENCODING_LENGTH} characters."
                    ),
                })
            }
            Some(_) => {}
        }
        if self.p256dh.is_none() {
            errors.push(ValidationError::not_null("p256dh"));
        }
        if self.auth.is_none() {
            errors.push(ValidationError::not_null("auth"));
        }
        if self.utc_offset.is_none() {
            errors.push(ValidationError::not_null("utc_offset"));
        }
        errors
    }

    pub fn timezone_name(&self) -> Option<String> {
        self.utc_offset.map(timezone_name)
    }

    pub fn encoding(&self) -> Result<ContentEncoding, PushError> {
        self.content_encoding
            .as_deref()
            .ok_or_else(|| {
                PushError::ValidationFailed("subscription has no content encoding".to_string())
            })?
            .parse()
    }

    pub fn receiver_key(&self) -> Result<PublicKey, PushError> {
        let p256dh = self.p256dh.as_deref().ok_or_else(|| {
            PushError::ValidationFailed("subscription has no p256dh key".to_string())
        })?;
        PublicKey::from_base64url_named("p256dh", p256dh)
    }

    pub fn auth_secret(&self) -> Result<[u8; AUTH_SECRET_LENGTH], PushError> {
        let auth = self.auth.as_deref().ok_or_else(|| {
            PushError::ValidationFailed("subscription has no auth secret".to_string())
        })?;
        keys::parse_auth_secret(auth)
    }
}
