use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use futures_util::StreamExt;
use serde::Deserialize;
use shadow_sync_core::ShadowKey;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// A cloud-pushed event, decoded off the event stream. Consumers forward
/// `ShadowUpdated`/`ShadowDeleted` into [`shadow_sync_engine::SyncHandler`]'s
/// `push_local_*` methods and `Disconnected`/`Connected` into
/// `on_connection_interrupted`/`on_connection_resumed` (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub enum CloudEvent {
    Connected,
    Disconnected,
    ShadowUpdated { key: ShadowKey, document: Vec<u8>, version: u64 },
    ShadowDeleted { key: ShadowKey, version: u64 },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    ShadowUpdated {
        thing_name: String,
        shadow_name: String,
        document: serde_json::Value,
        version: u64,
    },
    ShadowDeleted {
        thing_name: String,
        shadow_name: String,
        version: u64,
    },
}

/// Background-thread bridge from a `tokio_tungstenite` event stream to a
/// plain [`std::sync::mpsc`] channel, grounded on the same `block_on`
/// bridge idiom as [`crate::http::HttpCloudClient`] — the rest of the
/// engine is synchronous, so the only place this crate touches an async
/// runtime is inside this one background thread.
pub struct WebSocketCloudEvents {
    events: Receiver<CloudEvent>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WebSocketCloudEvents {
    /// Spawns the background thread and connects to `url`. Reconnects with
    /// a fixed 3s backoff on stream drop until `shutdown` is requested.
    pub fn connect(url: impl Into<String>) -> Self {
        let url = url.into();
        let (tx, rx) = std::sync::mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);

        let worker = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(error = %e, "failed to start websocket event runtime");
                    return;
                }
            };
            runtime.block_on(run_event_loop(url, tx, worker_shutdown));
        });

        WebSocketCloudEvents {
            events: rx,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Blocks until the next event arrives, or returns `None` once the
    /// background thread has shut down and drained its channel.
    pub fn recv(&self) -> Option<CloudEvent> {
        self.events.recv().ok()
    }

    /// Non-blocking poll, for drivers that interleave this with other work.
    pub fn try_recv(&self) -> Option<CloudEvent> {
        self.events.try_recv().ok()
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for WebSocketCloudEvents {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_event_loop(url: String, tx: Sender<CloudEvent>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        info!(%url, "connecting to cloud event stream");
        let (stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(error = %e, "websocket connect failed, retrying in 3s");
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                continue;
            }
        };

        if tx.send(CloudEvent::Connected).is_err() {
            return;
        }

        let (_write, mut read) = stream.split();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode(&text) {
                        if tx.send(event).is_err() {
                            return;
                        }
                    } else {
                        debug!(%text, "ignoring unrecognized cloud event payload");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "websocket read error");
                    break;
                }
            }
        }

        if tx.send(CloudEvent::Disconnected).is_err() {
            return;
        }
        if !shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        }
    }
}

fn decode(text: &str) -> Option<CloudEvent> {
    let wire: WireEvent = serde_json::from_str(text).ok()?;
    Some(match wire {
        WireEvent::ShadowUpdated {
            thing_name,
            shadow_name,
            document,
            version,
        } => CloudEvent::ShadowUpdated {
            key: ShadowKey::new(thing_name, shadow_name),
            document: serde_json::to_vec(&document).ok()?,
            version,
        },
        WireEvent::ShadowDeleted {
            thing_name,
            shadow_name,
            version,
        } => CloudEvent::ShadowDeleted {
            key: ShadowKey::new(thing_name, shadow_name),
            version,
        },
    })
}
