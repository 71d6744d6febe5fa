use std::future::Future;

use shadow_sync_core::{ShadowKey, SyncError};
use shadow_sync_engine::CloudClient;

const VERSION_HEADER: &str = "x-shadow-version";

/// Blocking `reqwest`-backed [`CloudClient`], bridging a synchronous trait
/// onto an async HTTP client since the engine's executors never `.await`
/// (spec §5 "why threads, not tasks"). The wire shape is deliberately
/// minimal: the document travels as the raw request/response body (shadow
/// bodies are already opaque JSON bytes per spec §3), and the version rides
/// along in the `x-shadow-version` header.
#[derive(Clone)]
pub struct HttpCloudClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCloudClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpCloudClient {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, reqwest::Error>
    where
        F: Future<Output = Result<T, reqwest::Error>>,
    {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.block_on(fut)
        } else {
            tokio::runtime::Runtime::new()
                .expect("failed to start a runtime for the blocking HTTP cloud client")
                .block_on(fut)
        }
    }

    fn shadow_url(&self, key: &ShadowKey) -> String {
        format!(
            "{}/things/{}/shadow?name={}",
            self.base_url.trim_end_matches('/'),
            key.thing_name,
            key.shadow_name
        )
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> SyncError {
        match status.as_u16() {
            409 => SyncError::Conflict,
            401 | 403 => SyncError::Skip(format!("cloud rejected request: unauthorized ({body})")),
            400 | 422 => SyncError::Skip(format!("cloud rejected malformed request: {body}")),
            _ => SyncError::Retryable(format!("cloud request failed with {status}: {body}")),
        }
    }
}

impl CloudClient for HttpCloudClient {
    fn get_thing_shadow(&self, key: &ShadowKey) -> Result<Option<(Vec<u8>, u64)>, SyncError> {
        let url = self.shadow_url(key);
        let response = self
            .block_on(self.client.get(&url).send())
            .map_err(|e| SyncError::Retryable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = self.block_on(response.text()).unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let version = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| SyncError::Retryable(format!("cloud response missing {VERSION_HEADER}")))?;
        let bytes = self
            .block_on(response.bytes())
            .map_err(|e| SyncError::Retryable(e.to_string()))?;
        Ok(Some((bytes.to_vec(), version)))
    }

    fn update_thing_shadow(&self, key: &ShadowKey, document: &[u8], expected_version: u64) -> Result<u64, SyncError> {
        let url = format!("{}&expected_version={expected_version}", self.shadow_url(key));
        let response = self
            .block_on(
                self.client
                    .put(&url)
                    .header("content-type", "application/json")
                    .body(document.to_vec())
                    .send(),
            )
            .map_err(|e| SyncError::Retryable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = self.block_on(response.text()).unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| SyncError::Retryable(format!("cloud response missing {VERSION_HEADER}")))
    }

    fn delete_thing_shadow(&self, key: &ShadowKey, expected_version: u64) -> Result<(), SyncError> {
        let url = format!("{}&expected_version={expected_version}", self.shadow_url(key));
        let response = self
            .block_on(self.client.delete(&url).send())
            .map_err(|e| SyncError::Retryable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = self.block_on(response.text()).unwrap_or_default();
        Err(Self::map_status(status, body))
    }
}
