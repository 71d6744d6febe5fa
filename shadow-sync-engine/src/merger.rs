use crate::request::{RequestTag, SyncRequest};

/// Outcome of merging an incoming request against the one already queued
/// for the same [`ShadowKey`](shadow_sync_core::ShadowKey) (spec §4.2).
pub enum MergeOutcome {
    /// Drop the incoming request; the existing one stays queued unchanged.
    Drop,
    /// Replace the queued request with this one.
    Replace(SyncRequest),
    /// Leave the queue exactly as it is (existing request is already
    /// authoritative, e.g. a queued `FullShadow`).
    Keep,
    /// Rare case: the queue slot holds the first request and a second is
    /// appended behind it. No cell of the current merge table produces
    /// this, but the merger's signature supports it per spec §4.2.
    #[allow(dead_code)]
    Split(SyncRequest, SyncRequest),
}

impl MergeOutcome {
    /// A short tag for logging; avoids requiring `Debug` on `SyncRequest`'s
    /// payloads just to trace a merge decision.
    pub fn label(&self) -> &'static str {
        match self {
            MergeOutcome::Drop => "drop",
            MergeOutcome::Replace(_) => "replace",
            MergeOutcome::Keep => "keep",
            MergeOutcome::Split(_, _) => "split",
        }
    }
}

/// Pure function over variant tags: collapses `incoming` against the
/// already-queued `existing` request for the same shadow, per the merge
/// table in spec §4.2. Direction gating happens earlier, in the handler's
/// push methods — this function never consults [`Direction`].
pub fn merge(existing: &SyncRequest, incoming: SyncRequest) -> MergeOutcome {
    use RequestTag::*;

    let existing_tag = existing.tag();
    let incoming_tag = incoming.tag();

    // An already-queued FullShadow or forced overwrite is authoritative:
    // invariant I5 says FullShadow supersedes any other pending request,
    // and the same reasoning extends to the one-directional overwrites.
    if matches!(existing_tag, FullShadow | OverwriteLocal | OverwriteCloud) {
        return MergeOutcome::Keep;
    }

    // Conversely, an incoming FullShadow/overwrite always promotes the
    // slot, regardless of what's currently queued.
    if matches!(incoming_tag, FullShadow | OverwriteLocal | OverwriteCloud) {
        return MergeOutcome::Replace(incoming);
    }

    let same_side = matches!(
        (existing_tag, incoming_tag),
        (LocalUpdate, LocalUpdate)
            | (LocalUpdate, LocalDelete)
            | (LocalDelete, LocalUpdate)
            | (CloudUpdate, CloudUpdate)
            | (CloudUpdate, CloudDelete)
            | (CloudDelete, CloudUpdate)
    );

    if same_side {
        return MergeOutcome::Replace(incoming);
    }

    // Same variant, same side, both deletes: the second delete is
    // redundant with the first.
    if existing_tag == incoming_tag && matches!(existing_tag, LocalDelete | CloudDelete) {
        return MergeOutcome::Drop;
    }

    // Anything left is an opposite-side request for the same shadow — a
    // conflict the merger can't resolve locally. Promote to FullShadow,
    // which performs an authoritative three-way compare.
    MergeOutcome::Replace(SyncRequest::full_shadow_for(incoming.key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shadow_sync_core::ShadowKey;

    fn key() -> ShadowKey {
        ShadowKey::new("thing", "shadow")
    }

    fn local_update() -> SyncRequest {
        SyncRequest::LocalUpdate {
            key: key(),
            document: b"{}".to_vec(),
        }
    }

    fn local_delete() -> SyncRequest {
        SyncRequest::LocalDelete {
            key: key(),
            cloud_version: 1,
        }
    }

    fn cloud_update() -> SyncRequest {
        SyncRequest::CloudUpdate {
            key: key(),
            document: json!({"state": {"reported": {}}}),
        }
    }

    fn cloud_delete() -> SyncRequest {
        SyncRequest::CloudDelete { key: key() }
    }

    fn full() -> SyncRequest {
        SyncRequest::FullShadow { key: key() }
    }

    fn assert_replace_tag(outcome: MergeOutcome, expected: RequestTag) {
        match outcome {
            MergeOutcome::Replace(req) => assert_eq!(req.tag(), expected),
            _ => panic!("expected Replace"),
        }
    }

    #[test]
    fn local_update_existing_same_side_replaces() {
        assert_replace_tag(merge(&local_update(), local_update()), RequestTag::LocalUpdate);
        assert_replace_tag(merge(&local_update(), local_delete()), RequestTag::LocalDelete);
    }

    #[test]
    fn local_update_existing_opposite_side_promotes_to_full() {
        assert_replace_tag(merge(&local_update(), cloud_update()), RequestTag::FullShadow);
        assert_replace_tag(merge(&local_update(), cloud_delete()), RequestTag::FullShadow);
    }

    #[test]
    fn local_delete_existing_double_delete_drops() {
        assert!(matches!(merge(&local_delete(), local_delete()), MergeOutcome::Drop));
    }

    #[test]
    fn local_delete_existing_update_replaces() {
        assert_replace_tag(merge(&local_delete(), local_update()), RequestTag::LocalUpdate);
    }

    #[test]
    fn local_delete_existing_opposite_side_promotes_to_full() {
        assert_replace_tag(merge(&local_delete(), cloud_update()), RequestTag::FullShadow);
        assert_replace_tag(merge(&local_delete(), cloud_delete()), RequestTag::FullShadow);
    }

    #[test]
    fn cloud_update_existing_same_side_replaces() {
        assert_replace_tag(merge(&cloud_update(), cloud_update()), RequestTag::CloudUpdate);
        assert_replace_tag(merge(&cloud_update(), cloud_delete()), RequestTag::CloudDelete);
    }

    #[test]
    fn cloud_update_existing_opposite_side_promotes_to_full() {
        assert_replace_tag(merge(&cloud_update(), local_update()), RequestTag::FullShadow);
        assert_replace_tag(merge(&cloud_update(), local_delete()), RequestTag::FullShadow);
    }

    #[test]
    fn cloud_delete_existing_double_delete_drops() {
        assert!(matches!(merge(&cloud_delete(), cloud_delete()), MergeOutcome::Drop));
    }

    #[test]
    fn cloud_delete_existing_update_replaces() {
        assert_replace_tag(merge(&cloud_delete(), cloud_update()), RequestTag::CloudUpdate);
    }

    #[test]
    fn cloud_delete_existing_opposite_side_promotes_to_full() {
        assert_replace_tag(merge(&cloud_delete(), local_update()), RequestTag::FullShadow);
        assert_replace_tag(merge(&cloud_delete(), local_delete()), RequestTag::FullShadow);
    }

    #[test]
    fn full_existing_always_keeps() {
        for incoming in [local_update(), local_delete(), cloud_update(), cloud_delete(), full()] {
            assert!(matches!(merge(&full(), incoming), MergeOutcome::Keep));
        }
    }

    #[test]
    fn incoming_full_always_replaces() {
        for existing in [local_update(), local_delete(), cloud_update(), cloud_delete()] {
            assert_replace_tag(merge(&existing, full()), RequestTag::FullShadow);
        }
    }

    #[test]
    fn overwrite_existing_always_keeps() {
        let overwrite = SyncRequest::OverwriteCloud { key: key() };
        for incoming in [local_update(), local_delete(), cloud_update(), cloud_delete(), full()] {
            assert!(matches!(merge(&overwrite, incoming), MergeOutcome::Keep));
        }
    }
}
