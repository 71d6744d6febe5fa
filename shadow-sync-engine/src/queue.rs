use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use shadow_sync_core::{ShadowKey, SyncError};
use tracing::trace;

use crate::merger::{self, MergeOutcome};
use crate::request::SyncRequest;

const DEFAULT_CAPACITY: usize = 1024;

struct State {
    items: VecDeque<SyncRequest>,
    capacity: usize,
    closed: bool,
}

impl State {
    fn position_of(&self, key: &ShadowKey) -> Option<usize> {
        self.items.iter().position(|r| r.key() == key)
    }
}

/// Bounded FIFO keyed by [`ShadowKey`], with in-place merging on insert
/// (spec §4.3). At most one request per key sits in the queue at any
/// instant (invariant I3): `offer` consults the [`merger`] for a key
/// already present instead of appending a duplicate.
pub struct MergingBlockingQueue {
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl MergingBlockingQueue {
    pub fn new(capacity: usize) -> Self {
        MergingBlockingQueue {
            state: Mutex::new(State {
                items: VecDeque::new(),
                capacity: capacity.max(1),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Inserts `req`, blocking while the queue is full. Looks up any
    /// queued request under `req.key()`; if present, invokes the merger
    /// and mutates the queue slot in place (`Replace` keeps the existing
    /// position — it does not move to the tail). If absent, appends at
    /// the tail, preserving insertion order for distinct keys.
    pub fn offer(&self, req: SyncRequest) -> Result<(), SyncError> {
        let mut guard = self.state.lock();
        loop {
            if guard.closed {
                return Err(SyncError::Interrupted);
            }

            if let Some(idx) = guard.position_of(req.key()) {
                let key = req.key().clone();
                let outcome = merger::merge(&guard.items[idx], req);
                trace!(%key, outcome = outcome.label(), "merged incoming request into queued slot");
                match outcome {
                    MergeOutcome::Drop => {}
                    MergeOutcome::Keep => {}
                    MergeOutcome::Replace(replacement) => {
                        guard.items[idx] = replacement;
                    }
                    MergeOutcome::Split(first, second) => {
                        guard.items[idx] = first;
                        if guard.items.len() < guard.capacity {
                            guard.items.push_back(second);
                            self.not_empty.notify_one();
                        }
                    }
                }
                return Ok(());
            }

            if guard.items.len() < guard.capacity {
                guard.items.push_back(req);
                self.not_empty.notify_one();
                return Ok(());
            }

            let timed_out = self.not_full.wait_for(&mut guard, Duration::from_millis(200)).timed_out();
            let _ = timed_out;
        }
    }

    /// Blocks until non-empty (or the queue is closed), then removes and
    /// returns the head, erasing its key index entry atomically.
    pub fn take(&self) -> Result<SyncRequest, SyncError> {
        let mut guard = self.state.lock();
        loop {
            if let Some(req) = guard.items.pop_front() {
                self.not_full.notify_one();
                return Ok(req);
            }
            if guard.closed {
                return Err(SyncError::Interrupted);
            }
            self.not_empty.wait_for(&mut guard, Duration::from_millis(200));
        }
    }

    /// Non-blocking variant of `offer`: merges into an existing slot same
    /// as `offer`, but if the key is absent and the queue is full, drops
    /// the request and returns `false` instead of blocking. Used to
    /// re-enqueue a `FullShadow` from inside an executor, where blocking
    /// could deadlock a worker against the very queue it drains.
    pub fn try_offer(&self, req: SyncRequest) -> bool {
        let mut guard = self.state.lock();
        if guard.closed {
            return false;
        }
        if let Some(idx) = guard.position_of(req.key()) {
            let key = req.key().clone();
            let outcome = merger::merge(&guard.items[idx], req);
            trace!(%key, outcome = outcome.label(), "merged incoming request into queued slot (non-blocking)");
            match outcome {
                MergeOutcome::Drop | MergeOutcome::Keep => {}
                MergeOutcome::Replace(replacement) => guard.items[idx] = replacement,
                MergeOutcome::Split(first, second) => {
                    guard.items[idx] = first;
                    if guard.items.len() < guard.capacity {
                        guard.items.push_back(second);
                        self.not_empty.notify_one();
                    }
                }
            }
            return true;
        }
        if guard.items.len() < guard.capacity {
            guard.items.push_back(req);
            self.not_empty.notify_one();
            return true;
        }
        false
    }

    /// Non-blocking variant of `take` used by the periodic strategy to
    /// drain without waiting once the queue runs dry.
    pub fn poll(&self) -> Option<SyncRequest> {
        let mut guard = self.state.lock();
        let req = guard.items.pop_front();
        if req.is_some() {
            self.not_full.notify_one();
        }
        req
    }

    pub fn clear(&self) {
        let mut guard = self.state.lock();
        guard.items.clear();
        self.not_full.notify_all();
    }

    pub fn remaining_capacity(&self) -> usize {
        let guard = self.state.lock();
        guard.capacity.saturating_sub(guard.items.len())
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every blocked `offer`/`take` with [`SyncError::Interrupted`].
    /// Used by a strategy's `stop()` to unwind workers cooperatively.
    pub fn close(&self) {
        let mut guard = self.state.lock();
        guard.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Reopens a closed queue so a strategy can be restarted.
    pub fn reopen(&self) {
        let mut guard = self.state.lock();
        guard.closed = false;
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<ShadowKey> {
        self.state.lock().items.iter().map(|r| r.key().clone()).collect()
    }
}

impl Default for MergingBlockingQueue {
    fn default() -> Self {
        MergingBlockingQueue::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn key(n: u32) -> ShadowKey {
        ShadowKey::new(format!("thing-{n}"), "")
    }

    fn cloud_update(n: u32, x: i64) -> SyncRequest {
        SyncRequest::CloudUpdate {
            key: key(n),
            document: json!({"state": {"reported": {"x": x}}}),
        }
    }

    #[test]
    fn distinct_keys_preserve_insertion_order() {
        let queue = MergingBlockingQueue::default();
        queue.offer(cloud_update(1, 1)).unwrap();
        queue.offer(cloud_update(2, 1)).unwrap();
        queue.offer(cloud_update(3, 1)).unwrap();

        assert_eq!(queue.keys(), vec![key(1), key(2), key(3)]);
    }

    #[test]
    fn repeated_offers_for_same_key_collapse_to_one_slot() {
        let queue = MergingBlockingQueue::default();
        for i in 0..5 {
            queue.offer(cloud_update(1, i)).unwrap();
        }
        assert_eq!(queue.len(), 1);
        let head = queue.take().unwrap();
        match head {
            SyncRequest::CloudUpdate { document, .. } => {
                assert_eq!(document, json!({"state": {"reported": {"x": 4}}}));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn replace_keeps_original_queue_position() {
        let queue = MergingBlockingQueue::default();
        queue.offer(cloud_update(1, 0)).unwrap();
        queue.offer(cloud_update(2, 0)).unwrap();
        // Replaces key(1)'s slot in place; should not move to the tail.
        queue.offer(cloud_update(1, 1)).unwrap();

        assert_eq!(queue.keys(), vec![key(1), key(2)]);
    }

    #[test]
    fn take_blocks_until_offer_arrives() {
        let queue = Arc::new(MergingBlockingQueue::default());
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        queue.offer(cloud_update(1, 0)).unwrap();
        let got = reader.join().unwrap();
        assert_eq!(got.key(), &key(1));
    }

    #[test]
    fn close_unblocks_waiting_take_with_interrupted() {
        let queue = Arc::new(MergingBlockingQueue::default());
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take())
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        let result = reader.join().unwrap();
        assert!(matches!(result, Err(SyncError::Interrupted)));
    }

    #[test]
    fn clear_empties_the_queue() {
        let queue = MergingBlockingQueue::default();
        queue.offer(cloud_update(1, 0)).unwrap();
        queue.offer(cloud_update(2, 0)).unwrap();
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn remaining_capacity_tracks_occupancy() {
        let queue = MergingBlockingQueue::new(4);
        assert_eq!(queue.remaining_capacity(), 4);
        queue.offer(cloud_update(1, 0)).unwrap();
        assert_eq!(queue.remaining_capacity(), 3);
    }

    #[test]
    fn invariant_queue_size_never_exceeds_distinct_keys() {
        let queue = MergingBlockingQueue::default();
        let mut offered_keys = std::collections::HashSet::new();
        for i in 0..20u32 {
            let k = i % 4;
            offered_keys.insert(key(k));
            queue.offer(cloud_update(k, i as i64)).unwrap();
        }
        assert!(queue.len() <= offered_keys.len());
        for k in queue.keys() {
            assert!(offered_keys.contains(&k));
        }
    }
}
