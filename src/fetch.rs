//! Remote retrieval of voice artifacts.

use std::{path::Path, time::Duration};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;
use tracing_indicatif::{span_ext::IndicatifSpanExt, style::ProgressStyle};
use url::Url;

use crate::{
    registry::{ArtifactKind, ResourceDescriptor},
    store::ArtifactStore,
};

/// Writes the whole body behind `uri` to `dest`. Implementations may leave a
/// partial file at `dest` on failure; callers only ever pass temporary paths.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, uri: &Url, dest: &Path) -> anyhow::Result<()>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// `read_timeout` bounds every single read, headers and body chunks
    /// alike, so a server that stops sending fails the fetch instead of
    /// holding the voice in flight forever.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, uri: &Url, dest: &Path) -> anyhow::Result<()> {
        let response = self
            .client
            .get(uri.clone())
            .send()
            .await
            .with_context(|| format!("GET {uri}"))?
            .error_for_status()?;

        let span = tracing::info_span!("download", %uri);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} {msg}\n{wide_bar} {bytes}/{total_bytes}")
        {
            span.pb_set_style(&style);
        }
        if let Some(total) = response.content_length() {
            span.pb_set_length(total);
        }
        let file_name = uri
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or("artifact");
        span.pb_set_message(&format!("Downloading {file_name}"));

        async {
            let mut file = tokio::fs::File::create(dest)
                .await
                .with_context(|| format!("Failed to create {}", dest.display()))?;
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.with_context(|| format!("Reading body of {uri}"))?;
                file.write_all(&chunk).await?;
                tracing::Span::current().pb_inc(chunk.len() as u64);
            }
            file.flush().await?;
            file.sync_all().await?;
            anyhow::Ok(())
        }
        .instrument(span)
        .await?;
        Ok(())
    }
}

/// Retrieves one artifact kind, trying each source in order until one
/// succeeds, and finalizes it onto `final_path`.
pub async fn fetch_artifact(
    fetcher: &dyn Fetcher,
    descriptor: &ResourceDescriptor,
    kind: ArtifactKind,
    final_path: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    match ArtifactStore::sweep_stale_partials(final_path).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Removed {n} stale partial download(s) of {}", final_path.display()),
        Err(e) => tracing::warn!("Unable to sweep partial downloads of {}: {e}", final_path.display()),
    }

    let mut last_error = None;
    for uri in descriptor.locations(kind) {
        tracing::info!("Fetching {} {kind} from {uri}", descriptor.id);
        let temp = ArtifactStore::temp_path(final_path);
        match fetcher.fetch(uri, &temp).await {
            Ok(()) => {
                ArtifactStore::finalize(&temp, final_path)
                    .await
                    .with_context(|| format!("Failed to finalize {}", final_path.display()))?;
                tracing::info!("Downloaded {}", final_path.display());
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Fetching {uri} failed: {e:#}");
                let _ = tokio::fs::remove_file(&temp).await;
                last_error = Some(e.context(format!("{uri}")));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("no {kind} source for `{}`", descriptor.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFetcher, partial_files};

    fn two_mirrors() -> ResourceDescriptor {
        ResourceDescriptor::new("v")
            .with_location(ArtifactKind::Model, Url::parse("https://a.example/v.onnx").unwrap())
            .with_location(ArtifactKind::Model, Url::parse("https://b.example/v.onnx").unwrap())
            .with_location(ArtifactKind::Config, Url::parse("https://a.example/v.json").unwrap())
    }

    #[tokio::test]
    async fn falls_back_to_next_source() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v").join("v.onnx");
        let fetcher = MockFetcher::new().failing_host("a.example");

        fetch_artifact(&fetcher, &two_mirrors(), ArtifactKind::Model, &dest)
            .await
            .unwrap();

        assert!(dest.exists());
        assert!(partial_files(dest.parent().unwrap()).is_empty());
        assert_eq!(
            fetcher.requested(),
            vec!["https://a.example/v.onnx", "https://b.example/v.onnx"]
        );
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v.onnx");
        let fetcher = MockFetcher::new();

        fetch_artifact(&fetcher, &two_mirrors(), ArtifactKind::Model, &dest)
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn all_sources_failing_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v.json");
        let fetcher = MockFetcher::new().failing_host("a.example");

        let err = fetch_artifact(&fetcher, &two_mirrors(), ArtifactKind::Config, &dest)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("a.example"));
        assert!(!dest.exists());
        assert!(partial_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn stale_partials_are_swept_before_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v.onnx");
        let stale = dir.path().join(format!("v.onnx.{}.3.part", u32::MAX));
        std::fs::write(&stale, b"half of a crashed run").unwrap();

        fetch_artifact(&MockFetcher::new(), &two_mirrors(), ArtifactKind::Model, &dest)
            .await
            .unwrap();

        assert!(!stale.exists());
        assert!(partial_files(dir.path()).is_empty());
        assert!(dest.exists());
    }
}
