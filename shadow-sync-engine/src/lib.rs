//! The sync engine proper: the request model, the merger, the merging
//! blocking queue, the collaborator traits and read-only sync context, the
//! per-variant executors, the two drainer strategies, and the `SyncHandler`
//! façade that ties lifecycle events to enqueues (spec §4).

mod config;
mod context;
mod executor;
mod handler;
mod merger;
mod queue;
mod request;
mod retry;
mod strategy;

pub use config::{ConfigDiff, StrategyKind, SyncConfiguration};
pub use context::{CloudClient, LocalStore, ScopedLock, SyncContext};
pub use handler::SyncHandler;
pub use merger::{merge, MergeOutcome};
pub use queue::MergingBlockingQueue;
pub use request::{RequestTag, SyncRequest};
pub use retry::RetryConfig;
pub use strategy::{Periodic, Realtime, Strategy};
