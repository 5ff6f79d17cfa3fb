//! Seam to the synthesis engine. The cache only sequences these calls.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;

/// Mono PCM samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Audio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A voice loaded into memory. Shared read-only between all synthesis calls.
#[async_trait]
pub trait Voice: Send + Sync {
    fn sample_rate(&self) -> u32;

    async fn synthesize(&self, text: &str) -> anyhow::Result<Audio>;
}

/// Turns downloaded artifacts into a ready [`Voice`]. Fails on malformed or
/// unreadable files.
#[async_trait]
pub trait VoiceLoader: Send + Sync {
    async fn load(&self, model_path: &Path, config_path: &Path) -> anyhow::Result<Arc<dyn Voice>>;
}
