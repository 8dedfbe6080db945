use thiserror::Error;

/// The pool's matchable error taxonomy (§7).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,
    #[error("timed out waiting for an available browser")]
    Timeout,
    #[error("acquire was cancelled")]
    ContextCanceled,
    #[error("no healthy browser available after retries: {0}")]
    BrowserUnhealthy(String),
    #[error("failed to spawn browser {index}: {source}")]
    SpawnFailed {
        index: usize,
        #[source]
        source: wraith_browser::BrowserError,
    },
    #[error("failed to spawn proxied browser: {0}")]
    ProxySpawnFailed(#[source] wraith_browser::BrowserError),
}
