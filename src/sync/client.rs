//! Outbound HTTP for Wavelog uploads.

use std::time::Duration;

use log::debug;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::time::timeout;

use super::SyncError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const MAX_TIMEOUT_SECS: u64 = 15;

/// Successful (HTTP 200) upload.
#[derive(Debug, Clone)]
pub struct SyncResponse {
    pub body: String,
    pub bytes_sent: usize,
}

/// Thin wrapper over a shared `reqwest::Client` with a bounded timeout.
#[derive(Clone)]
pub struct SyncClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl SyncClient {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs.clamp(1, MAX_TIMEOUT_SECS)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `body` as JSON. Anything but a 200 is an error.
    pub async fn post(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<SyncResponse, SyncError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| SyncError::Transport(format!("payload encoding failed: {e}")))?;
        let bytes_sent = payload.len();
        debug!("POST {} ({} bytes)", endpoint, bytes_sent);

        let request = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(payload);

        let secs = self.timeout.as_secs();
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };
        let (status, text) = timeout(self.timeout, exchange)
            .await
            .map_err(|_| SyncError::Transport(format!("request timeout after {secs}s")))?
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if status != reqwest::StatusCode::OK {
            return Err(SyncError::RemoteRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(SyncResponse {
            body: text,
            bytes_sent,
        })
    }
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}
