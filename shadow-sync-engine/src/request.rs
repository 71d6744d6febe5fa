use serde_json::Value;
use shadow_sync_core::{ShadowKey, SyncError};

use crate::context::SyncContext;
use crate::executor;

/// One pending sync action for a specific [`ShadowKey`].
///
/// Every variant carries the key it applies to. `execute` is idempotent
/// with respect to already-reconciled state: if the sync information
/// already reflects the outcome, it returns success without mutating
/// anything (spec §4.1).
#[derive(Debug, Clone)]
pub enum SyncRequest {
    /// Apply a cloud→local update; `document` is the new shadow body.
    LocalUpdate { key: ShadowKey, document: Vec<u8> },
    /// Apply a cloud→local delete; `cloud_version` is the cloud version the
    /// delete was observed at.
    LocalDelete { key: ShadowKey, cloud_version: u64 },
    /// Push a local→cloud update; `document` is the JSON delta to merge
    /// onto the last synced cloud body.
    CloudUpdate { key: ShadowKey, document: Value },
    /// Push a local→cloud delete.
    CloudDelete { key: ShadowKey },
    /// Three-way reconcile of both sides against sync bookkeeping.
    FullShadow { key: ShadowKey },
    /// Force `local := cloud`.
    OverwriteLocal { key: ShadowKey },
    /// Force `cloud := local`.
    OverwriteCloud { key: ShadowKey },
}

/// Coarse tag used by the merger to look up the right table cell without
/// matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTag {
    LocalUpdate,
    LocalDelete,
    CloudUpdate,
    CloudDelete,
    FullShadow,
    OverwriteLocal,
    OverwriteCloud,
}

impl SyncRequest {
    pub fn key(&self) -> &ShadowKey {
        match self {
            SyncRequest::LocalUpdate { key, .. }
            | SyncRequest::LocalDelete { key, .. }
            | SyncRequest::CloudUpdate { key, .. }
            | SyncRequest::CloudDelete { key }
            | SyncRequest::FullShadow { key }
            | SyncRequest::OverwriteLocal { key }
            | SyncRequest::OverwriteCloud { key } => key,
        }
    }

    pub fn tag(&self) -> RequestTag {
        match self {
            SyncRequest::LocalUpdate { .. } => RequestTag::LocalUpdate,
            SyncRequest::LocalDelete { .. } => RequestTag::LocalDelete,
            SyncRequest::CloudUpdate { .. } => RequestTag::CloudUpdate,
            SyncRequest::CloudDelete { .. } => RequestTag::CloudDelete,
            SyncRequest::FullShadow { .. } => RequestTag::FullShadow,
            SyncRequest::OverwriteLocal { .. } => RequestTag::OverwriteLocal,
            SyncRequest::OverwriteCloud { .. } => RequestTag::OverwriteCloud,
        }
    }

    pub fn full_shadow_for(key: &ShadowKey) -> SyncRequest {
        SyncRequest::FullShadow { key: key.clone() }
    }

    /// Whether an update along this request's direction would actually
    /// change anything, given the sync information already on record.
    /// Executors consult this before doing any I/O (spec §4.4.1/4.4.2).
    pub fn is_update_necessary(&self, ctx: &SyncContext) -> bool {
        match self {
            SyncRequest::CloudUpdate { key, document } => {
                executor::cloud_update_is_necessary(ctx, key, document)
            }
            SyncRequest::LocalUpdate { key, document } => {
                executor::local_update_is_necessary(ctx, key, document)
            }
            _ => true,
        }
    }

    /// `FullShadow`'s three-way reconcile reads the direction live off
    /// `ctx` (spec §4.4.5 push/pull gating) so a `set_direction` call
    /// takes effect on the very next run without rebuilding the context.
    pub fn execute(&self, ctx: &SyncContext) -> Result<(), SyncError> {
        match self {
            SyncRequest::CloudUpdate { key, document } => executor::execute_cloud_update(ctx, key, document),
            SyncRequest::LocalUpdate { key, document } => executor::execute_local_update(ctx, key, document),
            SyncRequest::CloudDelete { key } => executor::execute_cloud_delete(ctx, key),
            SyncRequest::LocalDelete { key, cloud_version } => {
                executor::execute_local_delete(ctx, key, *cloud_version)
            }
            SyncRequest::FullShadow { key } => executor::execute_full_shadow(ctx, key, ctx.direction()),
            SyncRequest::OverwriteLocal { key } => executor::execute_overwrite_local(ctx, key),
            SyncRequest::OverwriteCloud { key } => executor::execute_overwrite_cloud(ctx, key),
        }
    }
}
