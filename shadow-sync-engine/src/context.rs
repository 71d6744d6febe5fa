use std::sync::Arc;

use parking_lot::RwLock;
use shadow_sync_core::{Direction, ShadowKey, SyncError, SyncInformation};

/// Guard returned by [`LocalStore::lock`]; releases the per-shadow write
/// lock when dropped, including on panic or early return from an executor.
pub trait ScopedLock {}
impl<T> ScopedLock for T {}

/// The device-local document store and sync metadata table (spec §6).
/// Deliberately out of scope as a *feature*: this crate only consumes the
/// interface below; [`shadow-sync-store`](../shadow_sync_store/index.html)
/// ships the in-memory reference implementation.
pub trait LocalStore: Send + Sync {
    fn list_synced_shadows(&self) -> Vec<ShadowKey>;
    fn get_sync_info(&self, key: &ShadowKey) -> Option<SyncInformation>;
    fn upsert_sync_info_if_absent(&self, row: SyncInformation);
    fn update_sync_info(&self, row: SyncInformation);
    fn delete_sync_info(&self, key: &ShadowKey);

    /// Current document bytes and local version, if the shadow exists.
    fn get_shadow(&self, key: &ShadowKey) -> Option<(Vec<u8>, u64)>;
    /// Writes `document` and returns the new local version.
    fn update_shadow(&self, key: &ShadowKey, document: &[u8]) -> Result<u64, SyncError>;
    /// Deletes the shadow and returns the version it was deleted at.
    fn delete_shadow(&self, key: &ShadowKey) -> Result<u64, SyncError>;

    /// Acquires the exclusive per-shadow lock executors hold while reading
    /// and updating sync information (spec §4.4).
    fn lock(&self, key: &ShadowKey) -> Box<dyn ScopedLock + '_>;
}

/// The cloud data-plane client (spec §6). Errors are pre-mapped by the
/// implementation per the contract: version mismatch -> `Conflict`,
/// throttling/transport failures -> `Retryable`, authorization failures ->
/// `Skip`; a delete against an already-missing shadow is treated as
/// success by the implementation, not surfaced as an error.
pub trait CloudClient: Send + Sync {
    /// `None` on 404.
    fn get_thing_shadow(&self, key: &ShadowKey) -> Result<Option<(Vec<u8>, u64)>, SyncError>;
    /// `expected_version` is the cloud version this device believes is
    /// current (0 means "shadow does not exist yet"); the cloud rejects
    /// with `Conflict` if its current version differs. Returns the new
    /// version on success.
    fn update_thing_shadow(
        &self,
        key: &ShadowKey,
        document: &[u8],
        expected_version: u64,
    ) -> Result<u64, SyncError>;
    /// `NotFound` is treated as success by the implementation.
    fn delete_thing_shadow(&self, key: &ShadowKey, expected_version: u64) -> Result<(), SyncError>;
}

/// Read-only bundle passed to each request's execution (spec §4.3). Built
/// once per `Strategy::start` and never stored on the request itself,
/// breaking the Handler/Strategy/Queue/Request reference cycle (spec §9).
#[derive(Clone)]
pub struct SyncContext {
    pub local_store: Arc<dyn LocalStore>,
    pub cloud_client: Arc<dyn CloudClient>,
    requeue: Arc<dyn Fn(ShadowKey) + Send + Sync>,
    direction: Arc<RwLock<Direction>>,
}

impl SyncContext {
    pub fn new(
        local_store: Arc<dyn LocalStore>,
        cloud_client: Arc<dyn CloudClient>,
        requeue: Arc<dyn Fn(ShadowKey) + Send + Sync>,
    ) -> Self {
        SyncContext::shared_with(
            local_store,
            cloud_client,
            requeue,
            Arc::new(RwLock::new(Direction::BetweenDeviceAndCloud)),
        )
    }

    /// Builds a context that shares its `direction` cell with the
    /// [`crate::handler::SyncHandler`] that built it, so a later
    /// `set_direction` call is observed by in-flight `FullShadow`
    /// executions without rebuilding the context (spec §4.4.5 direction
    /// gating).
    pub fn shared_with(
        local_store: Arc<dyn LocalStore>,
        cloud_client: Arc<dyn CloudClient>,
        requeue: Arc<dyn Fn(ShadowKey) + Send + Sync>,
        direction: Arc<RwLock<Direction>>,
    ) -> Self {
        SyncContext {
            local_store,
            cloud_client,
            requeue,
            direction,
        }
    }

    pub fn direction(&self) -> Direction {
        *self.direction.read()
    }

    /// Best-effort re-enqueue of a `FullShadow` for `key`, used by executors
    /// to absorb a cloud version conflict (spec §4.4.1/§4.4.5) without
    /// surfacing an error up through `execute`. Never blocks: a worker
    /// calling this from inside `execute` must not be able to deadlock
    /// against a full queue it would itself have to drain.
    pub fn enqueue_full_shadow(&self, key: &ShadowKey) {
        (self.requeue)(key.clone());
    }
}
