use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use shadow_sync_core::{Direction, ShadowKey, SyncInformation};
use tracing::{info, warn};

use crate::config::{ConfigDiff, StrategyKind, SyncConfiguration};
use crate::context::{CloudClient, LocalStore, SyncContext};
use crate::queue::MergingBlockingQueue;
use crate::request::SyncRequest;
use crate::retry::RetryConfig;
use crate::strategy::{Periodic, Realtime, Strategy};

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct Inner {
    direction: Direction,
    synced_keys: BTreeSet<ShadowKey>,
    strategy_kind: StrategyKind,
    strategy: Option<Arc<dyn Strategy>>,
    collaborators: Option<(Arc<dyn LocalStore>, Arc<dyn CloudClient>)>,
    parallelism: usize,
}

impl Default for Inner {
    fn default() -> Self {
        Inner {
            direction: Direction::BetweenDeviceAndCloud,
            synced_keys: BTreeSet::new(),
            strategy_kind: StrategyKind::default_realtime(),
            strategy: None,
            collaborators: None,
            parallelism: 1,
        }
    }
}

/// Façade owning the active queue/strategy pairing and translating external
/// lifecycle events into enqueues (spec §4.7). Owned by the service binary;
/// never a process-wide static (spec §9).
pub struct SyncHandler {
    state: RwLock<Inner>,
    retry: RetryConfig,
    queue_capacity: usize,
    /// Shared with every [`SyncContext`] built by `restart`, so a
    /// `set_direction` call takes effect for already-running `FullShadow`
    /// executions without waiting for the next context rebuild.
    direction_cell: Arc<RwLock<Direction>>,
}

impl Default for SyncHandler {
    fn default() -> Self {
        SyncHandler::new(RetryConfig::default(), DEFAULT_QUEUE_CAPACITY)
    }
}

impl SyncHandler {
    pub fn new(retry: RetryConfig, queue_capacity: usize) -> Self {
        SyncHandler {
            state: RwLock::new(Inner::default()),
            retry,
            queue_capacity,
            direction_cell: Arc::new(RwLock::new(Direction::BetweenDeviceAndCloud)),
        }
    }

    fn build_strategy(&self, kind: StrategyKind) -> Arc<dyn Strategy> {
        let queue = Arc::new(MergingBlockingQueue::new(self.queue_capacity));
        match kind {
            StrategyKind::Realtime => Arc::new(Realtime::new(queue, self.retry)) as Arc<dyn Strategy>,
            StrategyKind::Periodic { .. } => {
                let interval = kind.interval().expect("Periodic always has an interval");
                Arc::new(Periodic::new(queue, self.retry, interval)) as Arc<dyn Strategy>
            }
        }
    }

    /// Builds a fresh strategy from the currently recorded direction/keys/
    /// strategy kind, starts it against `local_store`/`cloud_client`, and
    /// seeds a full sync. Used by `start` and by every operation that has
    /// to restart the strategy (`set_strategy`, a direction boundary
    /// crossing, a config reload that changes either).
    fn restart(&self, local_store: Arc<dyn LocalStore>, cloud_client: Arc<dyn CloudClient>, parallelism: usize) {
        let kind = { self.state.read().strategy_kind };
        let strategy = self.build_strategy(kind);
        let requeue_target = Arc::clone(&strategy);
        let ctx = SyncContext::shared_with(
            Arc::clone(&local_store),
            Arc::clone(&cloud_client),
            Arc::new(move |key: ShadowKey| {
                if !requeue_target.try_put(SyncRequest::full_shadow_for(&key)) {
                    warn!(%key, "dropped re-enqueued FullShadow: queue full");
                }
            }),
            Arc::clone(&self.direction_cell),
        );
        strategy.start(ctx, parallelism);

        let mut state = self.state.write();
        state.strategy = Some(strategy);
        state.collaborators = Some((local_store, cloud_client));
        state.parallelism = parallelism;
        drop(state);

        self.seed_full_sync();
    }

    /// Starts the handler against `config`, then enqueues the full-sync
    /// seed: one request per synced key, shaped by direction (spec §4.7).
    /// Per the resolved open question, the seed is skipped entirely when
    /// there are no synced keys to seed.
    pub fn start(
        &self,
        local_store: Arc<dyn LocalStore>,
        cloud_client: Arc<dyn CloudClient>,
        config: &SyncConfiguration,
        parallelism: usize,
    ) {
        {
            let mut state = self.state.write();
            state.direction = config.direction;
            state.synced_keys = config.synced_keys.clone();
            state.strategy_kind = config.strategy;
        }
        *self.direction_cell.write() = config.direction;
        self.restart(local_store, cloud_client, parallelism);
    }

    pub fn stop(&self) {
        let strategy = self.state.write().strategy.take();
        if let Some(strategy) = strategy {
            strategy.stop();
        }
    }

    fn seed_full_sync(&self) {
        let (direction, keys, strategy) = {
            let state = self.state.read();
            if state.synced_keys.is_empty() {
                return;
            }
            let strategy = match &state.strategy {
                Some(s) => Arc::clone(s),
                None => return,
            };
            (state.direction, state.synced_keys.clone(), strategy)
        };

        for key in keys {
            let req = match direction {
                Direction::BetweenDeviceAndCloud => SyncRequest::FullShadow { key: key.clone() },
                Direction::DeviceToCloud => SyncRequest::OverwriteCloud { key: key.clone() },
                Direction::CloudToDevice => SyncRequest::OverwriteLocal { key: key.clone() },
            };
            if strategy.remaining_capacity() == 0 {
                warn!(%key, "full-sync seed queue is full, blocking until space frees up");
            }
            if let Err(e) = strategy.put(req) {
                warn!(%key, error = %e, "full-sync seed enqueue failed");
            }
        }
    }

    /// `set_strategy(s)`: stops, swaps, and restarts (spec §4.7).
    pub fn set_strategy(&self, kind: StrategyKind) {
        let (local_store, cloud_client, parallelism) = {
            let state = self.state.read();
            match &state.collaborators {
                Some((l, c)) => (Arc::clone(l), Arc::clone(c), state.parallelism),
                None => {
                    drop(state);
                    self.state.write().strategy_kind = kind;
                    return;
                }
            }
        };
        self.stop();
        self.state.write().strategy_kind = kind;
        self.restart(local_store, cloud_client, parallelism);
    }

    /// `set_direction(d)`: records the new direction and, only at a
    /// `DeviceToCloud <-> CloudToDevice` boundary, signals the cloud
    /// collaborator (the implementation's responsibility; this core only
    /// logs the edge) and re-seeds (spec §4.7).
    pub fn set_direction(&self, new_direction: Direction) {
        let old_direction = {
            let mut state = self.state.write();
            let old = state.direction;
            state.direction = new_direction;
            old
        };
        *self.direction_cell.write() = new_direction;

        let crossed_push_pull_boundary = matches!(
            (old_direction, new_direction),
            (Direction::DeviceToCloud, Direction::CloudToDevice) | (Direction::CloudToDevice, Direction::DeviceToCloud)
        );

        if crossed_push_pull_boundary {
            info!(?old_direction, ?new_direction, "direction crossed push/pull boundary, re-seeding");
            self.seed_full_sync();
        }
    }

    /// Diffs `new_config` against the recorded state and applies: sync-info
    /// rows are added/removed on the local store, the strategy is
    /// stopped+swapped+restarted if it or the direction changed, new keys
    /// are seeded (spec §6 "Configuration (consumed)").
    pub fn apply_config_change(&self, new_config: &SyncConfiguration) {
        let (old_config, collaborators) = {
            let state = self.state.read();
            (
                SyncConfiguration {
                    strategy: state.strategy_kind,
                    direction: state.direction,
                    synced_keys: state.synced_keys.clone(),
                },
                state.collaborators.clone(),
            )
        };

        let diff = ConfigDiff::compute(&old_config, new_config);
        if diff.is_empty() {
            return;
        }

        if let Some((local_store, _)) = &collaborators {
            for key in &diff.removed_keys {
                local_store.delete_sync_info(key);
            }
            for key in &diff.added_keys {
                local_store.upsert_sync_info_if_absent(SyncInformation::new_for(key));
            }
        }

        {
            let mut state = self.state.write();
            state.synced_keys = new_config.synced_keys.clone();
            state.direction = new_config.direction;
            state.strategy_kind = new_config.strategy;
        }
        *self.direction_cell.write() = new_config.direction;

        if diff.strategy_changed || diff.direction_changed {
            if let Some((local_store, cloud_client)) = collaborators {
                let parallelism = self.state.read().parallelism;
                self.stop();
                self.restart(local_store, cloud_client, parallelism);
            }
        } else if !diff.added_keys.is_empty() {
            self.seed_full_sync();
        }
    }

    fn push(&self, key: &ShadowKey, allowed: impl FnOnce(Direction) -> bool, build: impl FnOnce(&ShadowKey) -> SyncRequest) {
        let (strategy, contains, allowed_now) = {
            let state = self.state.read();
            (state.strategy.as_ref().map(Arc::clone), state.synced_keys.contains(key), allowed(state.direction))
        };
        if !contains || !allowed_now {
            return;
        }
        let Some(strategy) = strategy else { return };
        if let Err(e) = strategy.put(build(key)) {
            warn!(%key, error = %e, "push failed");
        }
    }

    pub fn push_cloud_update(&self, key: &ShadowKey, document: Value) {
        self.push(key, Direction::allows_cloud_update, |k| SyncRequest::CloudUpdate {
            key: k.clone(),
            document,
        });
    }

    pub fn push_local_update(&self, key: &ShadowKey, document: Vec<u8>) {
        self.push(key, Direction::allows_local_update, |k| SyncRequest::LocalUpdate {
            key: k.clone(),
            document,
        });
    }

    pub fn push_cloud_delete(&self, key: &ShadowKey) {
        self.push(key, Direction::allows_cloud_delete, |k| SyncRequest::CloudDelete { key: k.clone() });
    }

    pub fn push_local_delete(&self, key: &ShadowKey, cloud_version: u64) {
        self.push(key, Direction::allows_local_delete, |k| SyncRequest::LocalDelete {
            key: k.clone(),
            cloud_version,
        });
    }

    /// `on_connection_interrupted()`: suspends the strategy (spec §6).
    pub fn on_connection_interrupted(&self) {
        self.stop();
    }

    /// `on_connection_resumed()`: restarts against the same collaborators
    /// and re-seeds (spec §6).
    pub fn on_connection_resumed(&self) {
        let (local_store, cloud_client, parallelism) = {
            let state = self.state.read();
            match &state.collaborators {
                Some((l, c)) => (Arc::clone(l), Arc::clone(c), state.parallelism),
                None => return,
            }
        };
        self.restart(local_store, cloud_client, parallelism);
    }
}

impl Clone for Inner {
    fn clone(&self) -> Self {
        Inner {
            direction: self.direction,
            synced_keys: self.synced_keys.clone(),
            strategy_kind: self.strategy_kind,
            strategy: self.strategy.clone(),
            collaborators: self.collaborators.clone(),
            parallelism: self.parallelism,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScopedLock;
    use serde_json::json;
    use shadow_sync_core::SyncError;
    use std::collections::HashMap;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeLocalStore {
        sync_info: parking_lot::Mutex<HashMap<ShadowKey, SyncInformation>>,
        shadows: parking_lot::Mutex<HashMap<ShadowKey, (Vec<u8>, u64)>>,
    }

    impl LocalStore for FakeLocalStore {
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
            let next = shadows.get(key).map(|(_, v)| v + 1).unwrap_or(1);
            shadows.insert(key.clone(), (document.to_vec(), next));
            Ok(next)
        }
        fn delete_shadow(&self, key: &ShadowKey) -> Result<u64, SyncError> {
            Ok(self.shadows.lock().remove(key).map(|(_, v)| v).unwrap_or(0))
        }
        fn lock(&self, _key: &ShadowKey) -> Box<dyn ScopedLock + '_> {
            Box::new(())
        }
    }

    struct EmptyCloudClient;
    impl CloudClient for EmptyCloudClient {
        fn get_thing_shadow(&self, _key: &ShadowKey) -> Result<Option<(Vec<u8>, u64)>, SyncError> {
            Ok(None)
        }
        fn update_thing_shadow(&self, _key: &ShadowKey, _document: &[u8], expected_version: u64) -> Result<u64, SyncError> {
            Ok(expected_version + 1)
        }
        fn delete_thing_shadow(&self, _key: &ShadowKey, _expected_version: u64) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn key() -> ShadowKey {
        ShadowKey::new("thing-1", "")
    }

    #[test]
    fn start_seeds_full_shadow_for_each_synced_key() {
        let handler = SyncHandler::default();
        let local = Arc::new(FakeLocalStore::default());
        let cloud = Arc::new(EmptyCloudClient);

        let mut config = SyncConfiguration::default();
        config.synced_keys.insert(key());

        handler.start(local.clone(), cloud, &config, 1);
        thread::sleep(Duration::from_millis(150));
        handler.stop();

        let row = local.get_sync_info(&key()).expect("seed should create a sync info row");
        assert_eq!(row.cloud_version, 0);
        assert_eq!(row.local_version, 0);
    }

    #[test]
    fn push_is_dropped_for_unsynced_key() {
        let handler = SyncHandler::default();
        let local = Arc::new(FakeLocalStore::default());
        let cloud = Arc::new(EmptyCloudClient);
        let config = SyncConfiguration::default();

        handler.start(local.clone(), cloud, &config, 1);
        handler.push_cloud_update(&key(), json!({"state": {"reported": {"x": 1}}}));
        thread::sleep(Duration::from_millis(100));
        handler.stop();

        assert!(local.get_sync_info(&key()).is_none());
    }

    #[test]
    fn push_is_dropped_when_direction_forbids_it() {
        let handler = SyncHandler::default();
        let local = Arc::new(FakeLocalStore::default());
        let cloud = Arc::new(EmptyCloudClient);

        let mut config = SyncConfiguration::default();
        config.synced_keys.insert(key());
        config.direction = Direction::CloudToDevice;

        handler.start(local.clone(), cloud, &config, 1);
        thread::sleep(Duration::from_millis(100));
        let version_after_seed = local.get_sync_info(&key()).unwrap().local_version;

        handler.push_cloud_update(&key(), json!({"state": {"reported": {"x": 1}}}));
        thread::sleep(Duration::from_millis(100));
        handler.stop();

        // CloudToDevice forbids pushing local->cloud; the seed's OverwriteLocal
        // may have run, but the later CloudUpdate push must have been dropped.
        let version_after_push = local.get_sync_info(&key()).unwrap().local_version;
        assert_eq!(version_after_seed, version_after_push);
    }

    #[test]
    fn set_direction_across_push_pull_boundary_reseeds() {
        let handler = SyncHandler::default();
        let local = Arc::new(FakeLocalStore::default());
        let cloud = Arc::new(EmptyCloudClient);

        let mut config = SyncConfiguration::default();
        config.synced_keys.insert(key());
        config.direction = Direction::DeviceToCloud;

        handler.start(local.clone(), cloud, &config, 1);
        thread::sleep(Duration::from_millis(100));

        handler.set_direction(Direction::CloudToDevice);
        thread::sleep(Duration::from_millis(100));
        handler.stop();

        // The re-seed under CloudToDevice issues OverwriteLocal, which should
        // have created a local shadow copy (from the empty cloud doc: a
        // delete-to-match-absence path that still touches sync info).
        assert!(local.get_sync_info(&key()).is_some());
    }
}
