use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shadow_sync_core::{ShadowKey, SyncError, SyncInformation};
use shadow_sync_engine::{CloudClient, LocalStore};

/// `HashMap`-backed reference [`LocalStore`]: one row per shadow document,
/// one per [`SyncInformation`], and a keyed table of per-shadow mutexes for
/// [`LocalStore::lock`]. Grounded on `acorn-trunk-mem`'s role as the
/// default demo/test trunk (spec §6, SPEC_FULL "reference collaborator
/// implementations").
#[derive(Default)]
pub struct InMemoryLocalStore {
    shadows: Mutex<HashMap<ShadowKey, (Vec<u8>, u64)>>,
    sync_info: Mutex<HashMap<ShadowKey, SyncInformation>>,
    locks: Mutex<HashMap<ShadowKey, Arc<Mutex<()>>>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        InMemoryLocalStore::default()
    }

    fn lock_for(&self, key: &ShadowKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }
}

impl LocalStore for InMemoryLocalStore {
    fn list_synced_shadows(&self) -> Vec<ShadowKey> {
        self.sync_info.lock().keys().cloned().collect()
    }

    fn get_sync_info(&self, key: &ShadowKey) -> Option<SyncInformation> {
        self.sync_info.lock().get(key).cloned()
    }

    fn upsert_sync_info_if_absent(&self, row: SyncInformation) {
        self.sync_info.lock().entry(row.key()).or_insert(row);
    }

    fn update_sync_info(&self, row: SyncInformation) {
        self.sync_info.lock().insert(row.key(), row);
    }

    fn delete_sync_info(&self, key: &ShadowKey) {
        self.sync_info.lock().remove(key);
    }

    fn get_shadow(&self, key: &ShadowKey) -> Option<(Vec<u8>, u64)> {
        self.shadows.lock().get(key).cloned()
    }

    fn update_shadow(&self, key: &ShadowKey, document: &[u8]) -> Result<u64, SyncError> {
        let mut shadows = self.shadows.lock();
        let next_version = shadows.get(key).map(|(_, v)| v + 1).unwrap_or(1);
        shadows.insert(key.clone(), (document.to_vec(), next_version));
        Ok(next_version)
    }

    fn delete_shadow(&self, key: &ShadowKey) -> Result<u64, SyncError> {
        Ok(self.shadows.lock().remove(key).map(|(_, v)| v).unwrap_or(0))
    }

    fn lock(&self, key: &ShadowKey) -> Box<dyn shadow_sync_engine::ScopedLock + '_> {
        let mutex = self.lock_for(key);
        Box::new(mutex.lock_arc())
    }
}

/// `HashMap`-backed reference [`CloudClient`]: enforces the same optimistic
/// version-conflict contract a real data plane would (spec §6).
#[derive(Default)]
pub struct InMemoryCloudClient {
    shadows: Mutex<HashMap<ShadowKey, (Vec<u8>, u64)>>,
}

impl InMemoryCloudClient {
    pub fn new() -> Self {
        InMemoryCloudClient::default()
    }

    /// Test/demo helper: seeds a shadow directly on the cloud side, bumping
    /// its version by one, without going through the engine.
    pub fn seed(&self, key: &ShadowKey, document: Vec<u8>) -> u64 {
        let mut shadows = self.shadows.lock();
        let next_version = shadows.get(key).map(|(_, v)| v + 1).unwrap_or(1);
        shadows.insert(key.clone(), (document, next_version));
        next_version
    }
}

impl CloudClient for InMemoryCloudClient {
    fn get_thing_shadow(&self, key: &ShadowKey) -> Result<Option<(Vec<u8>, u64)>, SyncError> {
        Ok(self.shadows.lock().get(key).cloned())
    }

    fn update_thing_shadow(&self, key: &ShadowKey, document: &[u8], expected_version: u64) -> Result<u64, SyncError> {
        let mut shadows = self.shadows.lock();
        let current = shadows.get(key).map(|(_, v)| *v).unwrap_or(0);
        if current != expected_version {
            return Err(SyncError::Conflict);
        }
        let next_version = current + 1;
        shadows.insert(key.clone(), (document.to_vec(), next_version));
        Ok(next_version)
    }

    fn delete_thing_shadow(&self, key: &ShadowKey, expected_version: u64) -> Result<(), SyncError> {
        let mut shadows = self.shadows.lock();
        match shadows.get(key) {
            None => Ok(()),
            Some((_, v)) if *v == expected_version => {
                shadows.remove(key);
                Ok(())
            }
            Some(_) => Err(SyncError::Conflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ShadowKey {
        ShadowKey::new("thing-1", "")
    }

    #[test]
    fn local_store_versions_advance_monotonically() {
        let store = InMemoryLocalStore::new();
        let v1 = store.update_shadow(&key(), b"{}").unwrap();
        let v2 = store.update_shadow(&key(), b"{\"x\":1}").unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }

    #[test]
    fn local_store_lock_is_reentrant_across_distinct_keys() {
        let store = InMemoryLocalStore::new();
        let other = ShadowKey::new("thing-2", "");
        let _a = store.lock(&key());
        let _b = store.lock(&other);
    }

    #[test]
    fn cloud_client_rejects_stale_expected_version() {
        let cloud = InMemoryCloudClient::new();
        cloud.seed(&key(), b"{}".to_vec());
        let result = cloud.update_thing_shadow(&key(), b"{\"x\":1}", 0);
        assert!(matches!(result, Err(SyncError::Conflict)));
    }

    #[test]
    fn cloud_client_delete_of_missing_shadow_is_success() {
        let cloud = InMemoryCloudClient::new();
        assert!(cloud.delete_thing_shadow(&key(), 0).is_ok());
    }
}
