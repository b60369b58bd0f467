use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::location::Location;

/// Key under which the bearer token is persisted on device.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

const RECENT_LOCATIONS_KEY: &str = "recent_locations";

/// Device-local persistent store. The mobile shell supplies the real
/// backend; `MemoryStore` covers tests and early wiring.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Most-recent-first list of places the rider has used, bounded and
/// de-duplicated by id (or exact coordinates when either side has none).
pub struct RecentLocations {
    store: Arc<dyn KeyValueStore>,
    cap: usize,
}

impl RecentLocations {
    pub fn new(store: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    pub async fn list(&self) -> Result<Vec<Location>, StoreError> {
        match self.store.get(RECENT_LOCATIONS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Insert at the front, dropping any previous entry for the same place
    /// and anything beyond the cap. Returns the updated list.
    pub async fn record(&self, location: Location) -> Result<Vec<Location>, StoreError> {
        let mut recent = self.list().await?;
        recent.retain(|existing| !existing.same_place(&location));
        recent.insert(0, location);
        recent.truncate(self.cap);
        self.store
            .put(RECENT_LOCATIONS_KEY, &serde_json::to_string(&recent)?)
            .await?;
        Ok(recent)
    }
}
