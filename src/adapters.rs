use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::PushError;
use crate::ports::{self, PushRequest, PushResponse, TransportError};
use crate::types::subscription::Subscription;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl ports::TimeProvider for SystemTimeProvider {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Posts push messages over HTTPS with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PushError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }
}

impl ports::PushTransport for ReqwestTransport {
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<PushResponse, TransportError>> + Send + 'a>>
    where
        Self: 'a;

    fn post<'a>(&'a self, request: PushRequest) -> Self::Fut<'a> {
        Box::pin(async move {
            let mut builder = self.client.post(&request.endpoint);
            for (name, value) in &request.headers {
                builder = builder.header(*name, value.as_str());
            }
            let response = builder
                .body(request.body)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = if status.is_success() {
                String::new()
            } else {
                response.text().await.unwrap_or_default()
            };
            Ok(PushResponse {
                status: status.as_u16(),
                retry_after,
                body,
            })
        })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

/// Process-local store, mostly for tests and one-shot tools.
#[derive(Debug)]
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<BTreeMap<u64, Subscription>>,
    next_id: AtomicU64,
}

impl Default for MemorySubscriptionStore {
    fn default() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl ports::SubscriptionStore for MemorySubscriptionStore {
    fn load_by_endpoint(&self, endpoint: &str) -> Result<Option<Subscription>, PushError> {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(subscriptions
            .values()
            .find(|subscription| subscription.endpoint == endpoint)
            .cloned())
    }

    fn create(&self, now: OffsetDateTime) -> Subscription {
        Subscription::new(self.next_id.fetch_add(1, Ordering::Relaxed), now)
    }

    fn save(&self, subscription: &Subscription) -> Result<(), PushError> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if subscriptions
            .values()
            .any(|other| other.id != subscription.id && other.endpoint == subscription.endpoint)
        {
            return Err(PushError::Storage(format!(
                "endpoint already registered: {}",
                subscription.endpoint
            )));
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    fn delete(&self, subscriptions: &[Subscription]) -> Result<(), PushError> {
        let mut stored = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for subscription in subscriptions {
            stored.remove(&subscription.id);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Subscription>, PushError> {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(subscriptions.values().cloned().collect())
    }
}

/// Subscriptions persisted as a JSON array in a single file.
///
/// The file is re-read on every call and replaced via a temporary sibling on
/// every write, so several short-lived processes can share it. Ids are taken
/// from the file at `create` time; a save whose id already belongs to another
/// endpoint is rejected instead of overwriting it.
#[derive(Debug)]
pub struct JsonFileSubscriptionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl JsonFileSubscriptionStore {
    /// A missing file is treated as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PushError> {
        let path = path.into();
        let existing = read_subscriptions(&path)?;
        let next_id = existing.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(next_id),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, change: F) -> Result<(), PushError>
    where
        F: FnOnce(&mut Vec<Subscription>) -> Result<(), PushError>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut subscriptions = read_subscriptions(&self.path)?;
        change(&mut subscriptions)?;
        write_subscriptions(&self.path, &subscriptions)
    }
}

impl ports::SubscriptionStore for JsonFileSubscriptionStore {
    fn load_by_endpoint(&self, endpoint: &str) -> Result<Option<Subscription>, PushError> {
        Ok(read_subscriptions(&self.path)?
            .into_iter()
            .find(|subscription| subscription.endpoint == endpoint))
    }

    fn create(&self, now: OffsetDateTime) -> Subscription {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match read_subscriptions(&self.path) {
            Ok(existing) => {
                let file_next = existing.iter().map(|s| s.id).max().unwrap_or(0) + 1;
                self.next_id.fetch_max(file_next, Ordering::Relaxed);
            }
            Err(err) => log::warn!("falling back to in-memory subscription ids: {err}"),
        }
        Subscription::new(self.next_id.fetch_add(1, Ordering::Relaxed), now)
    }

    fn save(&self, subscription: &Subscription) -> Result<(), PushError> {
        self.update(|subscriptions| {
            if subscriptions
                .iter()
                .any(|other| other.id != subscription.id && other.endpoint == subscription.endpoint)
            {
                return Err(PushError::Storage(format!(
                    "endpoint already registered: {}",
                    subscription.endpoint
                )));
            }
            if subscriptions
                .iter()
                .any(|other| other.id == subscription.id && other.endpoint != subscription.endpoint)
            {
                return Err(PushError::Storage(format!(
                    "subscription id {} is already used by another endpoint",
                    subscription.id
                )));
            }
            match subscriptions.iter_mut().find(|other| other.id == subscription.id) {
                Some(existing) => *existing = subscription.clone(),
                None => subscriptions.push(subscription.clone()),
            }
            Ok(())
        })
    }

    fn delete(&self, subscriptions: &[Subscription]) -> Result<(), PushError> {
        self.update(|stored| {
            stored.retain(|existing| subscriptions.iter().all(|gone| gone.id != existing.id));
            Ok(())
        })
    }

    fn list(&self) -> Result<Vec<Subscription>, PushError> {
        read_subscriptions(&self.path)
    }
}

fn read_subscriptions(path: &Path) -> Result<Vec<Subscription>, PushError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(PushError::Storage(format!(
                "failed to read {}: {err}",
                path.display()
            )));
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .map_err(|err| PushError::Storage(format!("failed to parse {}: {err}", path.display())))
}

fn write_subscriptions(path: &Path, subscriptions: &[Subscription]) -> Result<(), PushError> {
    let storage_error = |err: std::io::Error| {
        PushError::Storage(format!("failed to write {}: {err}", path.display()))
    };
    let json = serde_json::to_vec_pretty(subscriptions)
        .map_err(|err| PushError::Storage(format!("failed to encode subscriptions: {err}")))?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json).map_err(storage_error)?;
    std::fs::rename(&tmp_path, path).map_err(storage_error)
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::ports::SubscriptionStore;
    use time::UtcOffset;

    fn subscription(store: &dyn SubscriptionStore, endpoint: &str) -> Subscription {
        let mut subscription = store.create(OffsetDateTime::UNIX_EPOCH);
        subscription.endpoint = endpoint.to_string();
        subscription.p256dh = Some("p256dh".to_string());
        subscription.auth = Some("auth".to_string());
        subscription.content_encoding = Some("aes128gcm".to_string());
        subscription.utc_offset = Some(UtcOffset::from_hms(4, 0, 0).expect("offset"));
        subscription
    }

    fn exercise_store(store: &dyn SubscriptionStore) {
        // Given
        let first = subscription(store, "https://push.example/1");
        let second = subscription(store, "https://push.example/2");
        assert_ne!(first.id, second.id);

        // When
        store.save(&first).expect("save first");
        store.save(&second).expect("save second");
        let mut updated = first.clone();
        updated.user_agent = Some("Firefox".to_string());
        store.save(&updated).expect("update first");

        // Then
        let loaded = store
            .load_by_endpoint("https://push.example/1")
            .expect("load")
            .expect("stored");
        assert_eq!(loaded, updated);
        assert_eq!(store.list().expect("list").len(), 2);
        assert_eq!(store.load_by_endpoint("https://push.example/3").expect("load"), None);

        // When
        store.delete(&[second]).expect("delete");

        // Then
        let remaining = store.list().expect("list");
        assert_eq!(remaining, vec![updated]);
    }

    #[test]
    fn memory_store__should_save_load_and_delete() {
        exercise_store(&MemorySubscriptionStore::default());
    }

    #[test]
    fn json_store__should_save_load_and_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            JsonFileSubscriptionStore::open(dir.path().join("subscriptions.json")).expect("open");
        exercise_store(&store);
    }

    #[test]
    fn json_store__should_persist_across_instances() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("subscriptions.json");
        let store = JsonFileSubscriptionStore::open(&path).expect("open");
        let saved = subscription(&store, "https://push.example/1");
        store.save(&saved).expect("save");

        // When
        let reopened = JsonFileSubscriptionStore::open(&path).expect("reopen");

        // Then
        assert_eq!(reopened.list().expect("list"), vec![saved.clone()]);
        assert!(reopened.create(OffsetDateTime::UNIX_EPOCH).id > saved.id);
    }

    #[test]
    fn json_store__should_not_reuse_ids_across_instances() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("subscriptions.json");
        let a = JsonFileSubscriptionStore::open(&path).expect("open a");
        let b = JsonFileSubscriptionStore::open(&path).expect("open b");

        // When
        let first = subscription(&a, "https://push.example/a");
        a.save(&first).expect("save a");
        let second = subscription(&b, "https://push.example/b");
        b.save(&second).expect("save b");

        // Then
        assert_ne!(first.id, second.id);
        let endpoints: Vec<String> = a
            .list()
            .expect("list")
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        assert_eq!(endpoints, vec!["https://push.example/a", "https://push.example/b"]);
    }

    #[test]
    fn json_store__should_reject_id_owned_by_another_endpoint() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("subscriptions.json");
        let a = JsonFileSubscriptionStore::open(&path).expect("open a");
        let b = JsonFileSubscriptionStore::open(&path).expect("open b");
        let first = subscription(&a, "https://push.example/a");
        let second = subscription(&b, "https://push.example/b");
        assert_eq!(first.id, second.id);
        a.save(&first).expect("save a");

        // When
        let result = b.save(&second);

        // Then
        assert!(matches!(result, Err(PushError::Storage(_))));
        assert_eq!(a.list().expect("list"), vec![first]);
    }

    #[test]
    fn json_store__should_report_corrupt_file_as_storage_error() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("subscriptions.json");
        std::fs::write(&path, "{not json").expect("write");

        // When
        let result = JsonFileSubscriptionStore::open(&path);

        // Then
        assert!(matches!(result, Err(PushError::Storage(_))));
    }

    #[test]
    fn save__should_reject_duplicate_endpoint() {
        // Given
        let store = MemorySubscriptionStore::default();
        let first = subscription(&store, "https://push.example/1");
        let duplicate = subscription(&store, "https://push.example/1");
        store.save(&first).expect("save");

        // When
        let result = store.save(&duplicate);

        // Then
        assert!(matches!(result, Err(PushError::Storage(_))));
    }
}
