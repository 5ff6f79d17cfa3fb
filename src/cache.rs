//! Single-flight loading cache for voices.
//!
//! Every registered voice owns a `Slot`: a write-once handle plus an
//! in-flight flag. The caller that flips the flag runs the acquisition
//! (fetch missing artifacts, then load) in its own task; everyone else waits
//! until the flag clears and then either picks up the published handle or
//! tries again themselves. The flag is owned by an `InFlight` guard, so it
//! clears on every exit path, including a panic inside the loader.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::Notify;

use crate::{
    config::CacheConfig,
    error::{Result, VoiceError},
    fetch::{Fetcher, fetch_artifact},
    registry::{ArtifactKind, Registry, ResourceDescriptor},
    store::{ArtifactStore, LocalArtifact},
    voice::{Voice, VoiceLoader},
};

#[derive(Default)]
struct Slot {
    voice: OnceLock<Arc<dyn Voice>>,
    in_flight: AtomicBool,
    settled: Notify,
}

impl Slot {
    fn voice(&self) -> Option<Arc<dyn Voice>> {
        self.voice.get().cloned()
    }

    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn try_begin(self: &Arc<Self>) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight { slot: self.clone() })
    }
}

/// Ownership of a slot's in-flight flag.
struct InFlight {
    slot: Arc<Slot>,
}

impl InFlight {
    /// Publishes the handle before the flag is released on drop.
    fn publish(&self, voice: Arc<dyn Voice>) -> Option<Arc<dyn Voice>> {
        let _ = self.slot.voice.set(voice);
        self.slot.voice()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.slot.in_flight.store(false, Ordering::Release);
        self.slot.settled.notify_waiters();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStatus {
    pub id: String,
    pub loaded: bool,
    pub acquiring: bool,
    pub on_disk: bool,
}

struct Inner {
    registry: Registry,
    store: ArtifactStore,
    fetcher: Arc<dyn Fetcher>,
    loader: Arc<dyn VoiceLoader>,
    slots: HashMap<String, Arc<Slot>>,
    poll_interval: Duration,
}

impl Inner {
    fn lookup(&self, id: &str) -> Result<(&ResourceDescriptor, &Arc<Slot>)> {
        let descriptor = self.registry.describe(id)?;
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| VoiceError::NotReady { id: id.to_string() })?;
        Ok((descriptor, slot))
    }

    /// Makes every artifact of `descriptor` present on disk.
    async fn fetch_missing(&self, descriptor: &ResourceDescriptor) -> Result<LocalArtifact> {
        let id = descriptor.id.as_str();
        let local = self
            .store
            .inspect(descriptor)
            .await
            .map_err(|e| VoiceError::fetch(id, e.into()))?;
        if local.present {
            tracing::debug!("Artifacts for {id} already present, skipping fetch");
            return Ok(local);
        }

        tracing::info!("Downloading voice {id}: missing {:?}", local.missing());
        for &kind in local.missing() {
            fetch_artifact(self.fetcher.as_ref(), descriptor, kind, local.path(kind))
                .await
                .map_err(|e| VoiceError::fetch(id, e))?;
        }

        let local = self
            .store
            .inspect(descriptor)
            .await
            .map_err(|e| VoiceError::fetch(id, e.into()))?;
        if !local.present {
            return Err(VoiceError::fetch(
                id,
                anyhow::anyhow!("artifacts {:?} still missing after download", local.missing()),
            ));
        }
        tracing::info!("Voice {id} downloaded");
        Ok(local)
    }

    async fn acquire(&self, descriptor: &ResourceDescriptor) -> Result<Arc<dyn Voice>> {
        let started = Instant::now();
        let id = descriptor.id.as_str();
        tracing::info!("Acquiring voice {id}");

        let local = self.fetch_missing(descriptor).await?;
        let voice = self
            .loader
            .load(
                local.path(ArtifactKind::Model),
                local.path(ArtifactKind::Config),
            )
            .await
            .map_err(|e| VoiceError::load(id, e))?;

        tracing::info!("Voice {id} ready after {:?}", started.elapsed());
        Ok(voice)
    }
}

/// Process-wide voice cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct VoiceCache {
    inner: Arc<Inner>,
}

impl VoiceCache {
    pub fn new(
        registry: Registry,
        config: &CacheConfig,
        fetcher: Arc<dyn Fetcher>,
        loader: Arc<dyn VoiceLoader>,
    ) -> Self {
        let slots = registry
            .iter()
            .map(|d| (d.id.clone(), Arc::new(Slot::default())))
            .collect();
        Self {
            inner: Arc::new(Inner {
                registry,
                store: ArtifactStore::new(&config.models_dir),
                fetcher,
                loader,
                slots,
                poll_interval: config.poll_interval,
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }

    /// Returns the loaded voice, fetching and loading it first if needed.
    /// Concurrent callers for the same id share one acquisition.
    pub async fn ensure_ready(&self, id: &str) -> Result<Arc<dyn Voice>> {
        let (descriptor, slot) = self.inner.lookup(id)?;
        if let Some(voice) = slot.voice() {
            return Ok(voice);
        }

        let inner = self.inner.clone();
        let descriptor = descriptor.clone();
        self.single_flight(id, slot, Slot::voice, move |guard| {
            let inner = inner.clone();
            let descriptor = descriptor.clone();
            async move {
                let voice = inner.acquire(&descriptor).await?;
                guard.publish(voice).ok_or_else(|| VoiceError::NotReady {
                    id: descriptor.id.clone(),
                })
            }
        })
        .await
    }

    /// Downloads any missing artifacts without loading the voice.
    pub async fn download(&self, id: &str) -> Result<LocalArtifact> {
        let (descriptor, slot) = self.inner.lookup(id)?;

        let inner = self.inner.clone();
        let descriptor = descriptor.clone();
        self.single_flight(id, slot, |_| None, move |guard| {
            let inner = inner.clone();
            let descriptor = descriptor.clone();
            async move {
                let local = inner.fetch_missing(&descriptor).await;
                drop(guard);
                local
            }
        })
        .await
    }

    /// The loaded voice, if acquisition already succeeded.
    pub fn loaded(&self, id: &str) -> Result<Option<Arc<dyn Voice>>> {
        Ok(self.inner.lookup(id)?.1.voice())
    }

    pub fn is_loaded(&self, id: &str) -> Result<bool> {
        Ok(self.loaded(id)?.is_some())
    }

    pub fn is_acquiring(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lookup(id)?.1.is_in_flight())
    }

    pub async fn status(&self) -> Vec<VoiceStatus> {
        let mut out = Vec::new();
        for descriptor in self.inner.registry.iter() {
            let slot = &self.inner.slots[&descriptor.id];
            let on_disk = match self.inner.store.inspect(descriptor).await {
                Ok(local) => local.present,
                Err(e) => {
                    tracing::warn!("Unable to inspect artifacts of {}: {e}", descriptor.id);
                    false
                }
            };
            out.push(VoiceStatus {
                id: descriptor.id.clone(),
                loaded: slot.voice().is_some(),
                acquiring: slot.is_in_flight(),
                on_disk,
            });
        }
        out
    }

    /// Runs `job` while holding the slot's in-flight flag, or waits for the
    /// current holder. `done` short-circuits once the goal is already met.
    ///
    /// The job is spawned, so it runs to completion even if this caller is
    /// dropped while waiting on it.
    async fn single_flight<T, D, J, F>(&self, id: &str, slot: &Arc<Slot>, done: D, job: J) -> Result<T>
    where
        T: Send + 'static,
        D: Fn(&Slot) -> Option<T>,
        J: Fn(InFlight) -> F,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        loop {
            if let Some(value) = done(slot.as_ref()) {
                return Ok(value);
            }

            let settled = slot.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            match slot.try_begin() {
                Some(guard) => {
                    if let Some(value) = done(slot.as_ref()) {
                        return Ok(value);
                    }
                    return match tokio::spawn(job(guard)).await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!("Acquisition task for {id} aborted: {e}");
                            Err(VoiceError::NotReady { id: id.to_string() })
                        }
                    };
                }
                None => {
                    tracing::debug!("Waiting for in-flight acquisition of {id}");
                    tokio::select! {
                        _ = &mut settled => {}
                        _ = tokio::time::sleep(self.inner.poll_interval) => {}
                    }
                }
            }
        }
    }
}
