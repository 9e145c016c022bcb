//! Best-effort online/offline markers.
//!
//! Two markers per user live in a [`PresenceStore`]: `online_user:{id}` (refreshed on every
//! authenticated request, expires after `online_ttl`) and `offline_user:{id}` (set when an
//! administrator forces the user out, cleared on the next login). Presence never fails a
//! request: every store error is logged and swallowed by [`PresenceTracker`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use moka::{Expiry, future::Cache};
use tracing::{debug, instrument, warn};

use crate::{errors::Result, types::UserId};

const ONLINE_PREFIX: &str = "online_user:";
const OFFLINE_PREFIX: &str = "offline_user:";

/// Key/marker store with optional per-key expiry.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set(&self, key: &str, ttl: Option<Duration>) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn has(&self, key: &str) -> Result<bool>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy)]
struct Marker {
    ttl: Option<Duration>,
}

struct MarkerExpiry;

impl Expiry<String, Marker> for MarkerExpiry {
    fn expire_after_create(&self, _key: &String, value: &Marker, _created_at: std::time::Instant) -> Option<Duration> {
        value.ttl
    }

    // Re-setting a marker restarts its clock
    fn expire_after_update(
        &self,
        _key: &String,
        value: &Marker,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process presence store.
pub struct MemoryPresenceStore {
    markers: Cache<String, Marker>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            markers: Cache::builder().expire_after(MarkerExpiry).build(),
        }
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set(&self, key: &str, ttl: Option<Duration>) -> Result<()> {
        self.markers.insert(key.to_string(), Marker { ttl }).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.markers.invalidate(key).await;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.markers.contains_key(key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .markers
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.as_ref().clone())
            .collect())
    }
}

/// Tracks who is online and who has been forced offline.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    online_ttl: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, online_ttl: Duration) -> Self {
        Self { store, online_ttl }
    }

    fn online_key(user_id: UserId) -> String {
        format!("{ONLINE_PREFIX}{user_id}")
    }

    fn offline_key(user_id: UserId) -> String {
        format!("{OFFLINE_PREFIX}{user_id}")
    }

    /// Called on login: lifts any forced-offline marker and marks the user online.
    #[instrument(skip(self))]
    pub async fn mark_online(&self, user_id: UserId) {
        if let Err(e) = self.store.remove(&Self::offline_key(user_id)).await {
            warn!("Failed to clear offline marker for user {}: {}", user_id, e);
        }
        self.touch(user_id).await;
    }

    /// Refresh the online marker
    pub async fn touch(&self, user_id: UserId) {
        if let Err(e) = self.store.set(&Self::online_key(user_id), Some(self.online_ttl)).await {
            warn!("Failed to refresh online marker for user {}: {}", user_id, e);
        }
    }

    #[instrument(skip(self))]
    pub async fn mark_offline(&self, user_id: UserId) {
        if let Err(e) = self.store.remove(&Self::online_key(user_id)).await {
            warn!("Failed to clear online marker for user {}: {}", user_id, e);
        }
    }

    /// Sets the offline marker. The caller is responsible for revoking the user's sessions.
    #[instrument(skip(self))]
    pub async fn force_offline(&self, user_id: UserId) {
        if let Err(e) = self.store.set(&Self::offline_key(user_id), None).await {
            warn!("Failed to set offline marker for user {}: {}", user_id, e);
        }
        self.mark_offline(user_id).await;
    }

    /// Unknown on store failure is treated as not forced.
    pub async fn is_forced_offline(&self, user_id: UserId) -> bool {
        match self.store.has(&Self::offline_key(user_id)).await {
            Ok(forced) => forced,
            Err(e) => {
                warn!("Failed to read offline marker for user {}: {}", user_id, e);
                false
            }
        }
    }

    /// Ids of users with a live online marker, ascending
    pub async fn online_users(&self) -> Vec<UserId> {
        let keys = match self.store.keys_with_prefix(ONLINE_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list online users: {}", e);
                return Vec::new();
            }
        };

        let mut ids: Vec<UserId> = keys
            .iter()
            .filter_map(|key| match key[ONLINE_PREFIX.len()..].parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    debug!("Ignoring unparseable presence key {}", key);
                    None
                }
            })
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FailingPresenceStore;

    fn tracker(ttl: Duration) -> PresenceTracker {
        PresenceTracker::new(Arc::new(MemoryPresenceStore::new()), ttl)
    }

    #[tokio::test]
    async fn test_login_clears_forced_offline() {
        let presence = tracker(Duration::from_secs(60));

        presence.force_offline(5).await;
        assert!(presence.is_forced_offline(5).await);
        assert!(!presence.is_forced_offline(6).await);

        presence.mark_online(5).await;
        assert!(!presence.is_forced_offline(5).await);
        assert_eq!(presence.online_users().await, vec![5]);
    }

    #[tokio::test]
    async fn test_mark_online_is_idempotent() {
        let presence = tracker(Duration::from_secs(60));
        presence.mark_online(3).await;
        presence.mark_online(3).await;
        presence.mark_online(1).await;
        assert_eq!(presence.online_users().await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_offline_removes_from_online_list() {
        let presence = tracker(Duration::from_secs(60));
        presence.mark_online(1).await;
        presence.mark_online(2).await;

        presence.mark_offline(1).await;
        presence.force_offline(2).await;
        assert!(presence.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn test_online_marker_expires() {
        let presence = tracker(Duration::from_millis(50));
        presence.mark_online(1).await;
        assert_eq!(presence.online_users().await, vec![1]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(presence.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let presence = PresenceTracker::new(Arc::new(FailingPresenceStore), Duration::from_secs(60));
        presence.mark_online(1).await;
        presence.force_offline(1).await;
        assert!(!presence.is_forced_offline(1).await);
        assert!(presence.online_users().await.is_empty());
    }
}
