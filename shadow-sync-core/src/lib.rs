//! Shared data model for the edge-side shadow synchronization engine:
//! shadow identity, the shadow document helpers (version extraction,
//! null-leaf merge, diff), the per-shadow sync bookkeeping row, and the
//! error taxonomy every other crate in the workspace builds on.

mod document;
mod error;
mod key;
mod sync_info;

pub use document::{
    diff, empty_document, merge_null_deletes, parse, to_bytes, unchanged, version_of, with_version,
};
pub use error::{SyncError, SyncResult};
pub use key::{Direction, ShadowKey};
pub use sync_info::SyncInformation;
