//! Lazily downloaded, load-once speech voices.
//!
//! A [`Synthesizer`] asks the [`VoiceCache`] for a voice; the cache fetches
//! any missing artifacts, loads them exactly once no matter how many callers
//! arrive concurrently, and keeps the loaded voice for the rest of the
//! process.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod piper;
pub mod registry;
pub mod store;
pub mod synth;
pub mod testing;
pub mod voice;
pub mod wav;

pub use cache::{VoiceCache, VoiceStatus};
pub use config::CacheConfig;
pub use error::{Result, VoiceError};
pub use fetch::{Fetcher, HttpFetcher};
pub use piper::PiperLoader;
pub use registry::{ArtifactKind, DEFAULT_VOICE, Registry, ResourceDescriptor};
pub use store::{ArtifactStore, LocalArtifact};
pub use synth::Synthesizer;
pub use voice::{Audio, Voice, VoiceLoader};
