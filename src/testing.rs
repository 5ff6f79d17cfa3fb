//! Test doubles for the fetch and load seams.
//!
//! They count calls and can be told to fail, so tests can assert exactly how
//! many downloads and loads an operation triggered without network access or
//! a `piper` binary.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::bail;
use async_trait::async_trait;
use url::Url;

use crate::{
    fetch::Fetcher,
    registry::ArtifactKind,
    store::ArtifactStore,
    voice::{Audio, Voice, VoiceLoader},
};

/// Writes a small placeholder body for every request.
#[derive(Default)]
pub struct MockFetcher {
    requested: Mutex<Vec<String>>,
    delay: Option<Duration>,
    failing_hosts: Vec<String>,
    failing_paths: Vec<String>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_host(mut self, host: impl Into<String>) -> Self {
        self.failing_hosts.push(host.into());
        self
    }

    /// Fails every URI whose path contains `fragment`.
    pub fn failing_path(mut self, fragment: impl Into<String>) -> Self {
        self.failing_paths.push(fragment.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.requested.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, uri: &Url, dest: &Path) -> anyhow::Result<()> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(uri.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let host = uri.host_str().unwrap_or_default();
        if self.failing_hosts.iter().any(|h| h == host)
            || self.failing_paths.iter().any(|p| uri.path().contains(p.as_str()))
        {
            bail!("simulated network failure for {uri}");
        }
        tokio::fs::write(dest, uri.as_str()).await?;
        Ok(())
    }
}

/// Records every text it was asked to speak and returns one sample per byte.
pub struct MockVoice {
    sample_rate: u32,
    spoken: Mutex<Vec<String>>,
    fail: bool,
}

impl MockVoice {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            spoken: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing(sample_rate: u32) -> Self {
        Self {
            fail: true,
            ..Self::new(sample_rate)
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Voice for MockVoice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<Audio> {
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }
        if self.fail {
            bail!("simulated synthesis failure");
        }
        Ok(Audio {
            samples: vec![0.25; text.len()],
            sample_rate: self.sample_rate,
        })
    }
}

/// Hands out one shared [`MockVoice`] once both artifact files exist.
pub struct MockLoader {
    voice: Arc<MockVoice>,
    loads: AtomicUsize,
    fail_next: AtomicUsize,
    panic_next: AtomicUsize,
}

impl Default for MockLoader {
    fn default() -> Self {
        Self::with_voice(Arc::new(MockVoice::new(22_050)))
    }
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_voice(voice: Arc<MockVoice>) -> Self {
        Self {
            voice,
            loads: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            panic_next: AtomicUsize::new(0),
        }
    }

    /// The next `n` loads fail as if the artifacts were corrupt.
    pub fn failing_next(self, n: usize) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    pub fn panicking_next(self, n: usize) -> Self {
        self.panic_next.store(n, Ordering::SeqCst);
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn voice(&self) -> &Arc<MockVoice> {
        &self.voice
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl VoiceLoader for MockLoader {
    async fn load(&self, model_path: &Path, config_path: &Path) -> anyhow::Result<Arc<dyn Voice>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.panic_next) {
            panic!("simulated loader crash");
        }
        if take_one(&self.fail_next) {
            bail!("simulated corrupt model {}", model_path.display());
        }
        if !model_path.exists() || !config_path.exists() {
            bail!("artifacts missing at load time");
        }
        Ok(self.voice.clone())
    }
}

/// Puts placeholder artifacts for `id` into the store, as a previous run
/// would have left them.
pub fn seed_artifacts(store: &ArtifactStore, id: &str) {
    for kind in ArtifactKind::ALL {
        let path = store.artifact_path(id, kind);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&path, kind.suffix());
    }
}

/// Temporary download files directly inside `dir`.
pub fn partial_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "part"))
                .collect()
        })
        .unwrap_or_default()
}
