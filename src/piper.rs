//! Voices backed by the `piper` command line synthesizer.
//!
//! Loading validates the artifacts once; every synthesis call runs
//! `piper --model <onnx> --config <json> --output-raw`, feeds the text on
//! stdin and reads 16-bit little-endian PCM from stdout.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::voice::{Audio, Voice, VoiceLoader};

#[derive(Debug, Clone, Deserialize)]
pub struct PiperConfig {
    pub audio: AudioSection,
    #[serde(default)]
    pub num_speakers: Option<u32>,
    #[serde(default)]
    pub language: Option<LanguageSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioSection {
    pub sample_rate: u32,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageSection {
    pub code: String,
}

impl PiperConfig {
    pub fn parse(json: &str) -> anyhow::Result<Self> {
        let config: PiperConfig = serde_json::from_str(json).context("Malformed voice config")?;
        if config.audio.sample_rate == 0 {
            bail!("Voice config declares a sample rate of 0");
        }
        Ok(config)
    }
}

pub struct PiperLoader {
    executable: PathBuf,
}

impl PiperLoader {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

#[async_trait]
impl VoiceLoader for PiperLoader {
    async fn load(&self, model_path: &Path, config_path: &Path) -> anyhow::Result<Arc<dyn Voice>> {
        let json = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = PiperConfig::parse(&json)
            .with_context(|| format!("Invalid config {}", config_path.display()))?;

        let model_len = tokio::fs::metadata(model_path)
            .await
            .with_context(|| format!("Failed to stat {}", model_path.display()))?
            .len();
        if model_len == 0 {
            bail!("Model file {} is empty", model_path.display());
        }

        tracing::info!(
            "Loaded piper voice {} ({} Hz, {} speaker(s))",
            model_path.display(),
            config.audio.sample_rate,
            config.num_speakers.unwrap_or(1)
        );

        Ok(Arc::new(PiperVoice {
            executable: self.executable.clone(),
            model_path: model_path.to_path_buf(),
            config_path: config_path.to_path_buf(),
            config,
        }))
    }
}

pub struct PiperVoice {
    executable: PathBuf,
    model_path: PathBuf,
    config_path: PathBuf,
    config: PiperConfig,
}

impl PiperVoice {
    pub fn config(&self) -> &PiperConfig {
        &self.config
    }
}

#[async_trait]
impl Voice for PiperVoice {
    fn sample_rate(&self) -> u32 {
        self.config.audio.sample_rate
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<Audio> {
        let mut child = Command::new(&self.executable)
            .arg("--model")
            .arg(&self.model_path)
            .arg("--config")
            .arg(&self.config_path)
            .arg("--output-raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.executable.display()))?;

        let mut stdin = child.stdin.take().context("piper stdin unavailable")?;
        // One utterance per line on piper's side.
        let input = format!("{}\n", text.replace(['\r', '\n'], " "));
        let feed = async move {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.context("piper did not finish")?;
        fed.context("Failed to write text to piper")?;
        if !output.status.success() {
            bail!(
                "piper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(Audio {
            samples: pcm_s16le_to_f32(&output.stdout),
            sample_rate: self.sample_rate(),
        })
    }
}

fn pcm_s16le_to_f32(raw: &[u8]) -> Vec<f32> {
    raw.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
        .collect()
}
