use std::{path::PathBuf, time::Duration};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Network timeouts of the HTTP fetcher.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root of the local artifact store.
    pub models_dir: PathBuf,
    /// Upper bound on how long a waiter sleeps before re-checking an
    /// in-flight acquisition.
    pub poll_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn with_models_dir(mut self, models_dir: impl Into<PathBuf>) -> Self {
        self.models_dir = models_dir.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

pub fn default_models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
        .join("models")
        .join("piper")
}
