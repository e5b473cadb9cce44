//! Ephemeral, TTL-based key-value store used for per-driver locks and the
//! cached driver status/location shadow.
//!
//! Nothing in here is authoritative. Callers must tolerate entries being
//! stale or missing; the ride and driver stores remain the source of truth.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{DriverStatus, GeoPoint};

pub const LOCK_SENTINEL: &str = "locked";
pub const LOCATION_TTL: Duration = Duration::from_secs(60);
pub const STATUS_TTL: Duration = Duration::from_secs(120);

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Stores `value` only if `key` is absent (or expired). Returns whether
    /// the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;

    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

pub fn lock_key(driver_id: Uuid) -> String {
    format!("driver:lock:{driver_id}")
}

pub fn status_key(driver_id: Uuid) -> String {
    format!("driver:status:{driver_id}")
}

pub fn location_key(driver_id: Uuid) -> String {
    format!("driver:location:{driver_id}")
}

/// Driver-scoped view over a [`CoordinationStore`] that owns the key layout.
#[derive(Clone)]
pub struct DriverCache {
    store: Arc<dyn CoordinationStore>,
    lock_ttl: Duration,
}

impl DriverCache {
    pub fn new(store: Arc<dyn CoordinationStore>, lock_ttl: Duration) -> Self {
        Self { store, lock_ttl }
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    pub async fn acquire_lock(&self, driver_id: Uuid) -> Result<bool, AppError> {
        self.store
            .set_if_absent(&lock_key(driver_id), LOCK_SENTINEL, self.lock_ttl)
            .await
    }

    pub async fn release_lock(&self, driver_id: Uuid) -> Result<(), AppError> {
        self.store.delete(&lock_key(driver_id)).await
    }

    pub async fn is_locked(&self, driver_id: Uuid) -> Result<bool, AppError> {
        Ok(self.store.get(&lock_key(driver_id)).await?.is_some())
    }

    pub async fn cache_status(&self, driver_id: Uuid, status: DriverStatus) -> Result<(), AppError> {
        self.store
            .set(&status_key(driver_id), status.as_str(), STATUS_TTL)
            .await
    }

    /// `Ok(None)` means the shadow is empty, not that the driver is unavailable.
    pub async fn cached_status(&self, driver_id: Uuid) -> Result<Option<DriverStatus>, AppError> {
        let raw = self.store.get(&status_key(driver_id)).await?;
        Ok(raw.and_then(|value| {
            let parsed = DriverStatus::parse(&value);
            if parsed.is_none() {
                warn!(driver_id = %driver_id, value = %value, "ignoring unrecognised cached driver status");
            }
            parsed
        }))
    }

    pub async fn cache_location(&self, driver_id: Uuid, location: &GeoPoint) -> Result<(), AppError> {
        let encoded = serde_json::to_string(location)
            .map_err(|err| AppError::Internal(format!("failed to encode location: {err}")))?;
        self.store
            .set(&location_key(driver_id), &encoded, LOCATION_TTL)
            .await
    }

    pub async fn cached_location(&self, driver_id: Uuid) -> Result<Option<GeoPoint>, AppError> {
        match self.store.get(&location_key(driver_id)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| AppError::Store(format!("corrupt cached location: {err}"))),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    expires_at: Instant,
}

impl CachedValue {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Process-local store. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    entries: DashMap<String, CachedValue>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    return Ok(false);
                }
                occupied.insert(CachedValue::new(value, ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedValue::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.entries
            .insert(key.to_string(), CachedValue::new(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        match self.entries.get(key) {
            Some(entry) if entry.is_live() => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        // shard guard from `get` is released above; safe to take the write lock
        self.entries.remove_if(key, |_, entry| !entry.is_live());
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }
}
