//! Payload document for the service worker's `showNotification()`.
//!
//! See <https://developer.mozilla.org/en-US/docs/Web/API/ServiceWorkerRegistration/showNotification>.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PushError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
    Auto,
}

impl std::str::FromStr for Direction {
    type Err = PushError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ltr" => Ok(Direction::Ltr),
            "rtl" => Ok(Direction::Rtl),
            "auto" => Ok(Direction::Auto),
            other => Err(PushError::InvalidArgument(format!(
                "direction must be one of ltr, rtl, auto; got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub title: String,
    pub action: String,
}

impl NotificationAction {
    pub fn new(title: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            icon: None,
            title: title.into(),
            action: action.into(),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

/// Fields serialize with `title` first and the rest alphabetically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    actions: Vec<NotificationAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    badge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dir: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renotify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    require_interaction: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    silent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    vibrate: Vec<u32>,
}

impl Notification {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            actions: Vec::new(),
            badge: None,
            body: None,
            data: None,
            dir: None,
            icon: None,
            image: None,
            lang: None,
            renotify: None,
            require_interaction: None,
            silent: None,
            tag: None,
            timestamp: None,
            vibrate: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn actions(&self) -> &[NotificationAction] {
        &self.actions
    }

    pub fn add_action(&mut self, action: NotificationAction) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn set_badge(&mut self, badge: impl Into<String>) -> &mut Self {
        self.badge = Some(badge.into());
        self
    }

    pub fn set_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    pub fn set_data<T: Serialize>(&mut self, data: &T) -> Result<&mut Self, PushError> {
        let value = serde_json::to_value(data)
            .map_err(|err| PushError::InvalidArgument(format!("unserializable data: {err}")))?;
        self.data = Some(value);
        Ok(self)
    }

    /// Accepts exactly `ltr`, `rtl` or `auto`.
    pub fn set_direction(&mut self, direction: &str) -> Result<&mut Self, PushError> {
        self.dir = Some(direction.parse()?);
        Ok(self)
    }

    pub fn set_icon(&mut self, icon: impl Into<String>) -> &mut Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn set_image(&mut self, image: impl Into<String>) -> &mut Self {
        self.image = Some(image.into());
        self
    }

    pub fn set_language(&mut self, lang: impl Into<String>) -> &mut Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn set_renotify(&mut self, renotify: bool) -> &mut Self {
        self.renotify = Some(renotify);
        self
    }

    pub fn set_require_interaction(&mut self, require_interaction: bool) -> &mut Self {
        self.require_interaction = Some(require_interaction);
        self
    }

    pub fn set_silent(&mut self, silent: bool) -> &mut Self {
        self.silent = Some(silent);
        self
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn set_timestamp(&mut self, timestamp: u64) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn set_vibrations(&mut self, pattern: &[u32]) -> &mut Self {
        self.vibrate.extend_from_slice(pattern);
        self
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PushError> {
        serde_json::to_vec(self).map_err(|err| {
            PushError::InvalidArgument(format!("unserializable notification: {err}"))
        })
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_notification() -> Notification {
        let mut notification = Notification::new("The notification!");
        notification
            .add_action(NotificationAction::new("Title", "action").with_icon("/path/to/icon.png"))
            .set_badge("/path/to/badge.png")
            .set_body("The content.")
            .set_icon("/path/to/notification/icon.jpg")
            .set_image("/path/to/notification/image.jpg")
            .set_language("arbitrary")
            .set_renotify(false)
            .set_require_interaction(true)
            .set_silent(true)
            .set_tag("custom-tag")
            .set_timestamp(121391293192)
            .set_vibrations(&[200, 200, 0, 200, 100]);
        notification
            .set_data(&json!({"a": 1, "b": {"c": 2}}))
            .expect("data");
        for direction in ["rtl", "ltr", "auto"] {
            notification.set_direction(direction).expect("direction");
        }
        notification
    }

    #[test]
    fn to_json_bytes__should_produce_expected_document() {
        // Given
        let notification = full_notification();

        // When
        let bytes = notification.to_json_bytes().expect("serialize");
        let value: Value = serde_json::from_slice(&bytes).expect("json");

        // Then
        assert_eq!(
            value,
            json!({
                "title": "The notification!",
                "actions": [
                    {"icon": "/path/to/icon.png", "title": "Title", "action": "action"}
                ],
                "badge": "/path/to/badge.png",
                "body": "The content.",
                "data": {"a": 1, "b": {"c": 2}},
                "dir": "auto",
                "icon": "/path/to/notification/icon.jpg",
                "image": "/path/to/notification/image.jpg",
                "lang": "arbitrary",
                "renotify": false,
                "requireInteraction": true,
                "silent": true,
                "tag": "custom-tag",
                "timestamp": 121391293192u64,
                "vibrate": [200, 200, 0, 200, 100],
            })
        );
    }

    #[test]
    fn to_json_bytes__should_round_trip() {
        // Given
        let notification = full_notification();

        // When
        let bytes = notification.to_json_bytes().expect("serialize");
        let decoded: Notification = serde_json::from_slice(&bytes).expect("deserialize");

        // Then
        assert_eq!(decoded, notification);
    }

    #[test]
    fn to_json_bytes__should_keep_field_order_stable() {
        // Given
        let mut notification = Notification::new("Hi");
        notification.set_tag("t").set_body("b");

        // When
        let json = String::from_utf8(notification.to_json_bytes().expect("serialize"))
            .expect("utf8");

        // Then
        assert_eq!(json, r#"{"title":"Hi","body":"b","tag":"t"}"#);
    }

    #[test]
    fn set_direction__should_reject_case_variants() {
        for direction in ["bla", "Rtl", "rTl", "rtL", "Ltr", "lTr", "ltR", "Auto", "aut0", "RTL"] {
            // Given
            let mut notification = Notification::new("The notification!");

            // When
            let result = notification.set_direction(direction).map(|_| ());

            // Then
            assert!(
                matches!(result, Err(PushError::InvalidArgument(_))),
                "'{direction}' should be rejected"
            );
        }
    }

    #[test]
    fn add_action__should_omit_missing_icon() {
        // Given
        let mut notification = Notification::new("Hi");
        notification.add_action(NotificationAction::new("Open", "open"));

        // When
        let value: Value =
            serde_json::from_slice(&notification.to_json_bytes().expect("serialize"))
                .expect("json");

        // Then
        assert_eq!(value["actions"], json!([{"title": "Open", "action": "open"}]));
        assert_eq!(notification.actions().len(), 1);
        assert_eq!(notification.title(), "Hi");
    }
}
