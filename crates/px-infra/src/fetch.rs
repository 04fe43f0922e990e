use std::time::Duration;

use pve_api::Transport;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Pause between two attempts of a retried read.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Attempts used for inventory and VM detail reads.
pub const READ_ATTEMPTS: u32 = 3;

/// Bounded retry for idempotent JSON reads.
///
/// Every failure is retried alike, whether the request failed, the server
/// answered with an error status, or the body did not decode.
#[derive(Debug, Clone, Copy)]
pub struct RetryableFetch {
    backoff: Duration,
}

impl Default for RetryableFetch {
    fn default() -> Self {
        Self::new(RETRY_BACKOFF)
    }
}

impl RetryableFetch {
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// GET `path` up to `max_attempts` times (at least once) and decode the
    /// first successful reply. Returns the last error when every attempt fails.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        transport: &dyn Transport,
        path: &str,
        max_attempts: u32,
    ) -> pve_api::Result<T> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match transport.get_json(path).await {
                Ok(value) => pve_api::decode_value(value),
                Err(e) => Err(e),
            };

            match result {
                Ok(decoded) => return Ok(decoded),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    warn!(path, attempt, max_attempts, error = %e, "read failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
