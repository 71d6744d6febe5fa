use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use shadow_sync_core::SyncError;
use tracing::{error, warn};

use crate::context::SyncContext;
use crate::queue::MergingBlockingQueue;
use crate::request::SyncRequest;
use crate::retry::RetryConfig;

/// Common contract both drainer policies expose to the [`crate::handler::SyncHandler`]
/// (spec §4.5/§4.6, "Strategy common contract"). `stop()` must be idempotent
/// and must not lose an in-flight request's sync-information update.
pub trait Strategy: Send + Sync {
    fn start(&self, ctx: SyncContext, parallelism: usize);
    fn stop(&self);
    fn put(&self, req: SyncRequest) -> Result<(), SyncError>;
    /// Non-blocking `put`, used by executors re-enqueueing a `FullShadow`
    /// from inside `execute` itself (spec §4.4.1): blocking here could
    /// deadlock a worker against the very queue it drains. Returns `false`
    /// if the queue was full and the request was dropped.
    fn try_put(&self, req: SyncRequest) -> bool;
    fn clear(&self);
    fn remaining_capacity(&self) -> usize;
}

/// Sleeps in short slices so `cancel` is observed promptly instead of only
/// at the end of a long `thread::sleep`. Returns `false` if cancellation was
/// observed before the full duration elapsed.
fn sleep_cancelable(duration: Duration, cancel: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(50);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let slice = remaining.min(SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
    !cancel.load(Ordering::SeqCst)
}

/// Executes `req`, retrying `Retryable` failures with backoff up to
/// `retry.max_attempts`, logging and dropping on `Skip`, absorbing
/// `Conflict` (already resolved inside the executor) and `Interrupted`
/// silently, and escalating `Fatal` by tripping `cancel` so the owning
/// strategy stops taking further work (spec §7).
fn run_with_retry(ctx: &SyncContext, req: &SyncRequest, retry: &RetryConfig, cancel: &AtomicBool) {
    let mut attempt = 0u32;
    loop {
        match req.execute(ctx) {
            Ok(()) => return,
            Err(SyncError::Retryable(msg)) => {
                attempt += 1;
                if retry.exhausted(attempt) {
                    warn!(key = %req.key(), %msg, attempt, "retries exhausted, dropping request");
                    return;
                }
                let delay = retry.delay_for(attempt);
                warn!(key = %req.key(), %msg, attempt, ?delay, "retrying after transient failure");
                if !sleep_cancelable(delay, cancel) {
                    return;
                }
            }
            Err(SyncError::Skip(msg)) => {
                warn!(key = %req.key(), %msg, "skipping request: permanent failure");
                return;
            }
            Err(SyncError::Conflict) | Err(SyncError::Interrupted) => return,
            Err(SyncError::Fatal(msg)) => {
                error!(key = %req.key(), %msg, "fatal error, stopping strategy");
                cancel.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}

/// A worker pool that continuously drains the queue (spec §4.5).
pub struct Realtime {
    queue: Arc<MergingBlockingQueue>,
    retry: RetryConfig,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: Arc<AtomicBool>,
}

impl Realtime {
    pub fn new(queue: Arc<MergingBlockingQueue>, retry: RetryConfig) -> Self {
        Realtime {
            queue,
            retry,
            workers: Mutex::new(Vec::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Strategy for Realtime {
    fn start(&self, ctx: SyncContext, parallelism: usize) {
        self.cancel.store(false, Ordering::SeqCst);
        self.queue.reopen();
        let n = parallelism.max(1);
        let mut workers = self.workers.lock();
        for _ in 0..n {
            let queue = Arc::clone(&self.queue);
            let ctx = ctx.clone();
            let retry = self.retry;
            let cancel = Arc::clone(&self.cancel);
            workers.push(thread::spawn(move || loop {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                match queue.take() {
                    Ok(req) => run_with_retry(&ctx, &req, &retry, &cancel),
                    Err(_) => break,
                }
            }));
        }
    }

    fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.queue.close();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    fn put(&self, req: SyncRequest) -> Result<(), SyncError> {
        self.queue.offer(req)
    }

    fn try_put(&self, req: SyncRequest) -> bool {
        self.queue.try_offer(req)
    }

    fn clear(&self) {
        self.queue.clear();
    }

    fn remaining_capacity(&self) -> usize {
        self.queue.remaining_capacity()
    }
}

/// A single scheduled thread that drains the queue on a fixed interval
/// (spec §4.6). `parallelism` is accepted for contract parity with
/// [`Realtime`] but ignored: a tick always drains on one thread.
pub struct Periodic {
    queue: Arc<MergingBlockingQueue>,
    retry: RetryConfig,
    interval: Duration,
    cancel: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Periodic {
    pub fn new(queue: Arc<MergingBlockingQueue>, retry: RetryConfig, interval: Duration) -> Self {
        Periodic {
            queue,
            retry,
            interval,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }
}

impl Strategy for Periodic {
    fn start(&self, ctx: SyncContext, _parallelism: usize) {
        self.cancel.store(false, Ordering::SeqCst);
        self.queue.reopen();
        let queue = Arc::clone(&self.queue);
        let retry = self.retry;
        let interval = self.interval;
        let cancel = Arc::clone(&self.cancel);
        *self.worker.lock() = Some(thread::spawn(move || loop {
            if !sleep_cancelable(interval, &cancel) {
                break;
            }
            loop {
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                match queue.poll() {
                    Some(req) => run_with_retry(&ctx, &req, &retry, &cancel),
                    None => break,
                }
            }
        }));
    }

    fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.queue.close();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn put(&self, req: SyncRequest) -> Result<(), SyncError> {
        self.queue.offer(req)
    }

    fn try_put(&self, req: SyncRequest) -> bool {
        self.queue.try_offer(req)
    }

    fn clear(&self) {
        self.queue.clear();
    }

    fn remaining_capacity(&self) -> usize {
        self.queue.remaining_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CloudClient, LocalStore, ScopedLock};
    use serde_json::json;
    use shadow_sync_core::{ShadowKey, SyncInformation};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    struct CountingLocalStore {
        sync_info: Mutex<HashMap<ShadowKey, SyncInformation>>,
        shadows: Mutex<HashMap<ShadowKey, (Vec<u8>, u64)>>,
        update_calls: AtomicU32,
    }

    impl CountingLocalStore {
        fn new() -> Self {
            CountingLocalStore {
                sync_info: Mutex::new(HashMap::new()),
                shadows: Mutex::new(HashMap::new()),
                update_calls: AtomicU32::new(0),
            }
        }
    }

    impl LocalStore for CountingLocalStore {
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
            self.update_calls.fetch_add(1, Ordering::SeqCst);
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

    fn test_ctx() -> SyncContext {
        SyncContext::new(Arc::new(CountingLocalStore::new()), Arc::new(EmptyCloudClient), Arc::new(|_| {}))
    }

    #[test]
    fn realtime_drains_queued_requests() {
        let queue = Arc::new(MergingBlockingQueue::default());
        let strategy = Realtime::new(Arc::clone(&queue), RetryConfig::default());
        let ctx = test_ctx();

        strategy.put(SyncRequest::CloudUpdate {
            key: ShadowKey::new("t", ""),
            document: json!({"state": {"reported": {"x": 1}}}),
        })
        .unwrap();

        strategy.start(ctx.clone(), 1);
        // Give the worker a moment to take and execute.
        thread::sleep(Duration::from_millis(200));
        strategy.stop();

        assert_eq!(queue.len(), 0);
        assert!(ctx.local_store.get_sync_info(&ShadowKey::new("t", "")).is_some());
    }

    #[test]
    fn stop_is_idempotent() {
        let queue = Arc::new(MergingBlockingQueue::default());
        let strategy = Realtime::new(queue, RetryConfig::default());
        strategy.start(test_ctx(), 1);
        strategy.stop();
        strategy.stop();
    }

    #[test]
    fn periodic_drains_on_tick() {
        let queue = Arc::new(MergingBlockingQueue::default());
        let strategy = Periodic::new(Arc::clone(&queue), RetryConfig::default(), Duration::from_millis(100));
        let ctx = test_ctx();

        strategy.put(SyncRequest::CloudUpdate {
            key: ShadowKey::new("t", ""),
            document: json!({"state": {"reported": {"x": 1}}}),
        })
        .unwrap();

        strategy.start(ctx.clone(), 1);
        thread::sleep(Duration::from_millis(300));
        strategy.stop();

        assert_eq!(queue.len(), 0);
        assert!(ctx.local_store.get_sync_info(&ShadowKey::new("t", "")).is_some());
    }
}
