//! Reference [`shadow_sync_engine::LocalStore`]/[`shadow_sync_engine::CloudClient`]
//! collaborators: an in-memory pair used by every engine test and the
//! `shadow-syncd` default run mode, plus optional HTTP- and
//! WebSocket-backed cloud-side collaborators (spec §6, SPEC_FULL "reference
//! collaborator implementations").

mod memory;

#[cfg(feature = "http-client")]
mod http;

#[cfg(feature = "websocket")]
mod websocket;

pub use memory::{InMemoryCloudClient, InMemoryLocalStore};

#[cfg(feature = "http-client")]
pub use http::HttpCloudClient;

#[cfg(feature = "websocket")]
pub use websocket::{CloudEvent, WebSocketCloudEvents};
