//! On-disk layout of downloaded voice artifacts.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::registry::{ArtifactKind, ResourceDescriptor};

/// Local view of the files one voice needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub id: String,
    pub local_paths: BTreeMap<ArtifactKind, PathBuf>,
    pub present: bool,
    missing: Vec<ArtifactKind>,
}

impl LocalArtifact {
    pub fn missing(&self) -> &[ArtifactKind] {
        &self.missing
    }

    pub fn path(&self, kind: ArtifactKind) -> &Path {
        &self.local_paths[&kind]
    }
}

/// `<root>/<id>/<id>.onnx` and `<root>/<id>/<id>.onnx.json`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn voice_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn artifact_path(&self, id: &str, kind: ArtifactKind) -> PathBuf {
        self.voice_dir(id).join(format!("{id}{}", kind.suffix()))
    }

    /// Checks which artifacts exist at their final path. Temporary download
    /// files never count.
    pub async fn inspect(&self, descriptor: &ResourceDescriptor) -> std::io::Result<LocalArtifact> {
        let mut local_paths = BTreeMap::new();
        let mut missing = Vec::new();
        for kind in ArtifactKind::ALL {
            let path = self.artifact_path(&descriptor.id, kind);
            if !tokio::fs::try_exists(&path).await? {
                missing.push(kind);
            }
            local_paths.insert(kind, path);
        }
        Ok(LocalArtifact {
            id: descriptor.id.clone(),
            local_paths,
            present: missing.is_empty(),
            missing,
        })
    }

    /// Sibling path a download is written to before being renamed into place,
    /// `<file>.<pid>.<attempt>.part`. Every call returns a fresh name, so
    /// caches sharing a directory inside one process never collide.
    pub fn temp_path(final_path: &Path) -> PathBuf {
        static ATTEMPT: AtomicU64 = AtomicU64::new(0);
        let attempt = ATTEMPT.fetch_add(1, Ordering::Relaxed);
        let mut name = file_name(final_path);
        name.push(format!(".{}.{attempt}.part", std::process::id()));
        final_path.with_file_name(name)
    }

    /// Removes temporary files of `final_path` written by other processes,
    /// i.e. left over from a run that died mid-download. Returns how many
    /// were removed.
    pub async fn sweep_stale_partials(final_path: &Path) -> std::io::Result<usize> {
        let Some(dir) = final_path.parent() else {
            return Ok(0);
        };
        let prefix = format!("{}.", file_name(final_path).to_string_lossy());
        let own_pid = std::process::id();

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(pid) = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|n| n.strip_suffix(".part"))
                .and_then(partial_owner)
            else {
                continue;
            };
            if pid != own_pid {
                tracing::debug!("Removing stale download {}", entry.path().display());
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Moves a completed download onto its final path in one step.
    pub async fn finalize(temp: &Path, final_path: &Path) -> std::io::Result<()> {
        tokio::fs::rename(temp, final_path).await
    }
}

fn file_name(path: &Path) -> OsString {
    path.file_name().map(|n| n.to_os_string()).unwrap_or_default()
}

/// The pid of a `<pid>.<attempt>` (or older `<pid>`) temp file tag.
fn partial_owner(tag: &str) -> Option<u32> {
    let mut parts = tag.split('.');
    let pid = parts.next()?.parse().ok()?;
    match (parts.next(), parts.next()) {
        (None, _) => Some(pid),
        (Some(attempt), None) if attempt.parse::<u64>().is_ok() => Some(pid),
        _ => None,
    }
}
