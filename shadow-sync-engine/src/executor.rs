use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use shadow_sync_core::{self as core, Direction, ShadowKey, SyncError, SyncInformation};
use tracing::{debug, trace, warn};

use crate::context::SyncContext;

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn get_or_create(ctx: &SyncContext, key: &ShadowKey) -> SyncInformation {
    match ctx.local_store.get_sync_info(key) {
        Some(row) => row,
        None => {
            let fresh = SyncInformation::new_for(key);
            ctx.local_store.upsert_sync_info_if_absent(fresh.clone());
            fresh
        }
    }
}

/// Pushes `body` to the cloud as the full new document, bumping the sync
/// information's `cloud_version` on success. A version conflict is absorbed:
/// a `FullShadow` is re-enqueued for the key and `execute` still reports
/// success, since the conflict itself isn't a failure of this request (spec
/// §4.4.1).
fn push_to_cloud(ctx: &SyncContext, key: &ShadowKey, row: &mut SyncInformation, body: Value) -> Result<(), SyncError> {
    let new_version = row.cloud_version + 1;
    let versioned = core::with_version(body, new_version);
    let bytes = core::to_bytes(&versioned)?;

    match ctx.cloud_client.update_thing_shadow(key, &bytes, row.cloud_version) {
        Ok(accepted_version) => {
            row.cloud_version = accepted_version;
            row.cloud_deleted = false;
            row.last_synced_document = Some(bytes);
            row.last_sync_time = now_epoch();
            ctx.local_store.update_sync_info(row.clone());
            Ok(())
        }
        Err(SyncError::Conflict) => {
            warn!(%key, "cloud rejected expected version, re-reconciling");
            ctx.enqueue_full_shadow(key);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Writes `body` to the local store, trusting it to assign the new local
/// version (the local store owns that counter; the JSON body carries no
/// version field of its own). A returned version that doesn't advance is
/// a bug in the local store implementation, not a retryable condition.
fn write_to_local(ctx: &SyncContext, key: &ShadowKey, row: &mut SyncInformation, body: Value) -> Result<(), SyncError> {
    let bytes = core::to_bytes(&body)?;
    let new_version = ctx.local_store.update_shadow(key, &bytes)?;
    if row.local_version != 0 && new_version <= row.local_version {
        return Err(SyncError::Fatal(format!(
            "local store did not advance version for {key}: {} -> {}",
            row.local_version, new_version
        )));
    }
    row.local_version = new_version;
    row.last_synced_document = Some(bytes);
    row.last_sync_time = now_epoch();
    ctx.local_store.update_sync_info(row.clone());
    Ok(())
}

pub fn cloud_update_is_necessary(ctx: &SyncContext, key: &ShadowKey, patch: &Value) -> bool {
    let row = get_or_create(ctx, key);
    let base = row.last_synced_value().unwrap_or_else(core::empty_document);
    let merged = core::merge_null_deletes(&base, patch);
    !core::unchanged(&base, &merged)
}

pub fn local_update_is_necessary(ctx: &SyncContext, key: &ShadowKey, patch: &[u8]) -> bool {
    let row = get_or_create(ctx, key);
    let base = row.last_synced_value().unwrap_or_else(core::empty_document);
    let patch = match core::parse(patch) {
        Ok(v) => v,
        Err(_) => return true,
    };
    let merged = core::merge_null_deletes(&base, &patch);
    !core::unchanged(&base, &merged)
}

/// §4.4.1 CloudUpdate: merge the request payload onto `lastSyncedDocument`
/// with null-leaf deletion, then push the result if anything changed.
pub fn execute_cloud_update(ctx: &SyncContext, key: &ShadowKey, patch: &Value) -> Result<(), SyncError> {
    let _guard = ctx.local_store.lock(key);
    let mut row = get_or_create(ctx, key);
    let base = row.last_synced_value().unwrap_or_else(core::empty_document);
    let merged = core::merge_null_deletes(&base, patch);
    if core::unchanged(&base, &merged) {
        trace!(%key, "cloud update is a no-op");
        return Ok(());
    }
    push_to_cloud(ctx, key, &mut row, merged)
}

/// §4.4.2 LocalUpdate: symmetric to CloudUpdate, pushing to the local store.
pub fn execute_local_update(ctx: &SyncContext, key: &ShadowKey, patch: &[u8]) -> Result<(), SyncError> {
    let _guard = ctx.local_store.lock(key);
    let mut row = get_or_create(ctx, key);
    let base = row.last_synced_value().unwrap_or_else(core::empty_document);
    let patch = core::parse(patch)?;
    let merged = core::merge_null_deletes(&base, &patch);
    if core::unchanged(&base, &merged) {
        trace!(%key, "local update is a no-op");
        return Ok(());
    }
    write_to_local(ctx, key, &mut row, merged)
}

/// §4.4.3 CloudDelete. Idempotent on an already-deleted shadow.
pub fn execute_cloud_delete(ctx: &SyncContext, key: &ShadowKey) -> Result<(), SyncError> {
    let _guard = ctx.local_store.lock(key);
    let mut row = get_or_create(ctx, key);
    if row.cloud_deleted {
        return Ok(());
    }
    match ctx.cloud_client.delete_thing_shadow(key, row.cloud_version) {
        Ok(()) => {
            row.cloud_deleted = true;
            row.cloud_version += 1;
            row.last_synced_document = None;
            row.last_sync_time = now_epoch();
            ctx.local_store.update_sync_info(row);
            Ok(())
        }
        Err(SyncError::Conflict) => {
            ctx.enqueue_full_shadow(key);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// §4.4.4 LocalDelete. `cloud_version` is the version the delete was
/// observed at on the cloud side and is folded into bookkeeping even though
/// the local store itself doesn't key deletes by it.
pub fn execute_local_delete(ctx: &SyncContext, key: &ShadowKey, cloud_version: u64) -> Result<(), SyncError> {
    let _guard = ctx.local_store.lock(key);
    let mut row = get_or_create(ctx, key);
    let new_version = ctx.local_store.delete_shadow(key)?;
    row.local_version = row.local_version.max(new_version);
    row.last_synced_document = None;
    row.last_sync_time = now_epoch();
    if cloud_version > row.cloud_version {
        row.cloud_version = cloud_version;
    }
    ctx.local_store.update_sync_info(row);
    Ok(())
}

/// §4.4.5 FullShadow: three-way reconcile of the local document (`L`), the
/// cloud document (`C`) and the last-synced bookkeeping (`lastSyncedDocument`,
/// `cloudVersion`, `localVersion`), gated by `direction`.
pub fn execute_full_shadow(ctx: &SyncContext, key: &ShadowKey, direction: Direction) -> Result<(), SyncError> {
    let _guard = ctx.local_store.lock(key);
    let mut row = get_or_create(ctx, key);

    let cloud = ctx.cloud_client.get_thing_shadow(key)?;
    let local = ctx.local_store.get_shadow(key);

    let cloud_unchanged = match &cloud {
        Some((_, v)) => *v == row.cloud_version,
        None => true,
    };
    let local_unchanged = match &local {
        Some((_, v)) => *v == row.local_version,
        None => true,
    };

    match (cloud.is_some(), cloud_unchanged, local.is_some(), local_unchanged) {
        (false, _, false, _) => {
            row.cloud_version = 0;
            row.local_version = 0;
            row.last_synced_document = None;
            row.cloud_deleted = false;
            ctx.local_store.update_sync_info(row);
            Ok(())
        }
        (false, _, true, true) => {
            if !direction.allows_cloud_delete() {
                return Ok(());
            }
            cloud_delete_to_match_local(ctx, key, &mut row)
        }
        (false, _, true, false) => {
            if !direction.allows_cloud_update() {
                return Ok(());
            }
            let (local_bytes, _) = local.expect("checked Some above");
            let local_doc = core::parse(&local_bytes)?;
            push_to_cloud(ctx, key, &mut row, local_doc)
        }
        (true, true, false, _) => {
            if !direction.allows_cloud_delete() {
                return Ok(());
            }
            cloud_delete_to_match_local(ctx, key, &mut row)
        }
        (true, false, false, _) => {
            if !direction.allows_local_update() {
                return Ok(());
            }
            let (cloud_bytes, cloud_version) = cloud.expect("checked Some above");
            let cloud_doc = core::parse(&cloud_bytes)?;
            write_to_local(ctx, key, &mut row, cloud_doc)?;
            row.cloud_version = cloud_version;
            ctx.local_store.update_sync_info(row);
            Ok(())
        }
        (true, true, true, true) => Ok(()),
        (true, false, true, true) => {
            if !direction.allows_local_update() {
                return Ok(());
            }
            let (cloud_bytes, cloud_version) = cloud.expect("checked Some above");
            let cloud_doc = core::parse(&cloud_bytes)?;
            write_to_local(ctx, key, &mut row, cloud_doc)?;
            row.cloud_version = cloud_version;
            ctx.local_store.update_sync_info(row);
            Ok(())
        }
        (true, true, true, false) => {
            if !direction.allows_cloud_update() {
                return Ok(());
            }
            let (local_bytes, _) = local.expect("checked Some above");
            let local_doc = core::parse(&local_bytes)?;
            push_to_cloud(ctx, key, &mut row, local_doc)
        }
        (true, false, true, false) => {
            let cloud = cloud.expect("checked Some above");
            let local = local.expect("checked Some above");
            three_way_merge(ctx, key, &mut row, direction, cloud, local)
        }
    }
}

fn cloud_delete_to_match_local(ctx: &SyncContext, key: &ShadowKey, row: &mut SyncInformation) -> Result<(), SyncError> {
    if row.cloud_deleted {
        return Ok(());
    }
    match ctx.cloud_client.delete_thing_shadow(key, row.cloud_version) {
        Ok(()) => {
            row.cloud_deleted = true;
            row.cloud_version += 1;
            row.last_synced_document = None;
            row.last_sync_time = now_epoch();
            ctx.local_store.update_sync_info(row.clone());
            Ok(())
        }
        Err(SyncError::Conflict) => {
            ctx.enqueue_full_shadow(key);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Both `L` and `C` have moved since the last reconcile. Computes
/// `Δlocal = diff(lastSyncedDocument, L)` and applies it atop `C` so that
/// local wins on any leaf both sides touched, producing the merged document
/// `M`. `Δcloud` is computed only to log what the cloud side contributed;
/// the merge formula doesn't need it, since `C` is already the base `M` is
/// built from.
fn three_way_merge(
    ctx: &SyncContext,
    key: &ShadowKey,
    row: &mut SyncInformation,
    direction: Direction,
    cloud: (Vec<u8>, u64),
    local: (Vec<u8>, u64),
) -> Result<(), SyncError> {
    let (cloud_bytes, cloud_version) = cloud;
    let (local_bytes, _local_version) = local;
    let cloud_doc = core::parse(&cloud_bytes)?;
    let local_doc = core::parse(&local_bytes)?;
    let base = row.last_synced_value().unwrap_or_else(core::empty_document);

    let delta_local = core::diff(&base, &local_doc);
    let delta_cloud = core::diff(&base, &cloud_doc);
    debug!(%key, cloud_delta = %delta_cloud, "three-way merge: cloud side also moved");

    match direction {
        Direction::BetweenDeviceAndCloud => {
            let merged = core::merge_null_deletes(&cloud_doc, &delta_local);
            match push_merged_result(ctx, key, row, merged.clone(), cloud_version)? {
                PushOutcome::Pushed => write_to_local(ctx, key, row, merged),
                PushOutcome::Conflict => execute_full_shadow(ctx, key, direction),
            }
        }
        Direction::DeviceToCloud => {
            let merged = core::merge_null_deletes(&cloud_doc, &delta_local);
            match push_merged_result(ctx, key, row, merged, cloud_version)? {
                PushOutcome::Pushed => Ok(()),
                PushOutcome::Conflict => execute_full_shadow(ctx, key, direction),
            }
        }
        Direction::CloudToDevice => write_to_local(ctx, key, row, cloud_doc),
    }
}

enum PushOutcome {
    Pushed,
    Conflict,
}

fn push_merged_result(
    ctx: &SyncContext,
    key: &ShadowKey,
    row: &mut SyncInformation,
    merged: Value,
    expected_cloud_version: u64,
) -> Result<PushOutcome, SyncError> {
    let versioned = core::with_version(merged, expected_cloud_version + 1);
    let bytes = core::to_bytes(&versioned)?;
    match ctx.cloud_client.update_thing_shadow(key, &bytes, expected_cloud_version) {
        Ok(accepted_version) => {
            row.cloud_version = accepted_version;
            row.cloud_deleted = false;
            row.last_synced_document = Some(bytes);
            row.last_sync_time = now_epoch();
            ctx.local_store.update_sync_info(row.clone());
            Ok(PushOutcome::Pushed)
        }
        Err(SyncError::Conflict) => Ok(PushOutcome::Conflict),
        Err(e) => Err(e),
    }
}

/// §4.4.6 OverwriteLocal: force `local := cloud`, skipping the three-way path.
pub fn execute_overwrite_local(ctx: &SyncContext, key: &ShadowKey) -> Result<(), SyncError> {
    let _guard = ctx.local_store.lock(key);
    let mut row = get_or_create(ctx, key);

    match ctx.cloud_client.get_thing_shadow(key)? {
        Some((cloud_bytes, cloud_version)) => {
            let cloud_doc = core::parse(&cloud_bytes)?;
            write_to_local(ctx, key, &mut row, cloud_doc)?;
            row.cloud_version = cloud_version;
            row.cloud_deleted = false;
            ctx.local_store.update_sync_info(row);
            Ok(())
        }
        None => {
            let _ = ctx.local_store.delete_shadow(key)?;
            row.last_synced_document = None;
            row.cloud_deleted = true;
            ctx.local_store.update_sync_info(row);
            Ok(())
        }
    }
}

/// §4.4.7 OverwriteCloud: force `cloud := local`, skipping the three-way path.
pub fn execute_overwrite_cloud(ctx: &SyncContext, key: &ShadowKey) -> Result<(), SyncError> {
    let _guard = ctx.local_store.lock(key);
    let mut row = get_or_create(ctx, key);

    match ctx.local_store.get_shadow(key) {
        Some((local_bytes, _)) => {
            let local_doc = core::parse(&local_bytes)?;
            push_to_cloud(ctx, key, &mut row, local_doc)
        }
        None => cloud_delete_to_match_local(ctx, key, &mut row),
    }
}
