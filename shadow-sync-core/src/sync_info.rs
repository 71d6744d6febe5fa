use crate::key::ShadowKey;

/// Bookkeeping row the local store owns and the sync engine mutates.
///
/// One row exists per shadow in the active sync configuration (invariant
/// I1); it is created with zero versions and epoch time at strategy start
/// if absent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SyncInformation {
    pub thing_name: String,
    pub shadow_name: String,
    /// Last cloud version this device has observed/confirmed.
    pub cloud_version: u64,
    /// Last local version this device has observed/confirmed.
    pub local_version: u64,
    /// Full document bytes as of the last successful reconcile.
    pub last_synced_document: Option<Vec<u8>>,
    /// Server timestamp (epoch seconds) of the last cloud-observed change.
    pub cloud_update_time: i64,
    /// Local wall-clock of the last successful reconcile.
    pub last_sync_time: i64,
    /// True between observing a cloud delete and propagating it.
    pub cloud_deleted: bool,
}

impl SyncInformation {
    /// A fresh row for `key`, per invariant I1: zero versions, epoch time,
    /// no synced document yet.
    pub fn new_for(key: &ShadowKey) -> Self {
        SyncInformation {
            thing_name: key.thing_name.clone(),
            shadow_name: key.shadow_name.clone(),
            cloud_version: 0,
            local_version: 0,
            last_synced_document: None,
            cloud_update_time: 0,
            last_sync_time: 0,
            cloud_deleted: false,
        }
    }

    pub fn key(&self) -> ShadowKey {
        ShadowKey::new(self.thing_name.clone(), self.shadow_name.clone())
    }

    pub fn last_synced_value(&self) -> Option<serde_json::Value> {
        self.last_synced_document
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}
