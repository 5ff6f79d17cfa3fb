//! Static catalog of known voices and where their artifacts live.
//!
//! A [`Registry`] is built once at start-up (from the built-in catalog,
//! optionally extended from a JSON catalog file) and never mutated after it is
//! handed to a cache.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Component, Path},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{Result, VoiceError};

pub const DEFAULT_VOICE: &str = "de_DE-thorsten-high";

const PIPER_VOICES_BASE: &str = "https://huggingface.co/rhasspy/piper-voices/resolve/main";

/// Fallback sample rate for descriptors that do not carry one.
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Model,
    Config,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Model, ArtifactKind::Config];

    /// File name suffix appended to the voice id on disk.
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Model => ".onnx",
            ArtifactKind::Config => ".onnx.json",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Model => f.write_str("model"),
            ArtifactKind::Config => f.write_str("config"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchLocation {
    pub kind: ArtifactKind,
    pub uri: Url,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub fetch_locations: Vec<FetchLocation>,
    pub metadata: BTreeMap<String, Value>,
}

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fetch_locations: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_location(mut self, kind: ArtifactKind, uri: Url) -> Self {
        self.fetch_locations.push(FetchLocation { kind, uri });
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sources for one artifact kind, in the order they should be tried.
    pub fn locations(&self, kind: ArtifactKind) -> impl Iterator<Item = &Url> {
        self.fetch_locations
            .iter()
            .filter(move |l| l.kind == kind)
            .map(|l| &l.uri)
    }

    pub fn sample_rate(&self) -> u32 {
        self.metadata
            .get("sample_rate")
            .and_then(Value::as_u64)
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn language(&self) -> Option<&str> {
        self.metadata.get("language").and_then(Value::as_str)
    }
}

/// One entry of a JSON voice catalog.
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    model: Vec<Url>,
    config: Vec<Url>,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    language: Option<String>,
}

impl From<CatalogEntry> for ResourceDescriptor {
    fn from(entry: CatalogEntry) -> Self {
        let mut descriptor = ResourceDescriptor::new(entry.id);
        for uri in entry.model {
            descriptor = descriptor.with_location(ArtifactKind::Model, uri);
        }
        for uri in entry.config {
            descriptor = descriptor.with_location(ArtifactKind::Config, uri);
        }
        descriptor = descriptor.with_metadata(
            "sample_rate",
            entry.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
        );
        if let Some(language) = entry.language {
            descriptor = descriptor.with_metadata("language", language);
        }
        descriptor
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: Vec<ResourceDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The Piper voices shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (id, path, language) in [
            ("de_DE-thorsten-high", "de/de_DE/thorsten/high", "de"),
            ("en_US-lessac-high", "en/en_US/lessac/high", "en"),
            ("en_GB-alan-medium", "en/en_GB/alan/medium", "en"),
        ] {
            let descriptor = piper_voice(id, path, language)
                .expect("built-in catalog URLs are valid");
            registry
                .register(descriptor)
                .expect("built-in catalog ids are unique");
        }
        registry
    }

    /// Adds a descriptor. Ids must be unique, usable as a single directory
    /// name, and every artifact kind needs at least one source.
    pub fn register(&mut self, descriptor: ResourceDescriptor) -> Result<()> {
        if !is_single_component(&descriptor.id) {
            return Err(VoiceError::Catalog(format!(
                "voice id `{}` is not a plain directory name",
                descriptor.id
            )));
        }
        if self.descriptors.iter().any(|d| d.id == descriptor.id) {
            return Err(VoiceError::Catalog(format!(
                "duplicate voice id `{}`",
                descriptor.id
            )));
        }
        if let Some(kind) = ArtifactKind::ALL
            .into_iter()
            .find(|&kind| descriptor.locations(kind).next().is_none())
        {
            return Err(VoiceError::Catalog(format!(
                "voice `{}` has no {kind} source",
                descriptor.id
            )));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Registers every voice of a JSON catalog, in file order.
    pub fn extend_from_json(&mut self, json: &str) -> Result<()> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(json).map_err(|e| VoiceError::Catalog(e.to_string()))?;
        for entry in entries {
            self.register(entry.into())?;
        }
        Ok(())
    }

    pub fn extend_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| VoiceError::Catalog(format!("{}: {e}", path.display())))?;
        self.extend_from_json(&json)
    }

    pub fn describe(&self, id: &str) -> Result<&ResourceDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| VoiceError::UnknownResource {
                id: id.to_string(),
                available: self.list_ids().join(", "),
            })
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.iter()
    }
}

/// Ids become a directory under the models root, so they must not contain
/// separators or resolve anywhere else.
fn is_single_component(id: &str) -> bool {
    if id.contains(['/', '\\', ':']) {
        return false;
    }
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == id
    )
}

fn piper_voice(id: &str, path: &str, language: &str) -> std::result::Result<ResourceDescriptor, url::ParseError> {
    let model = Url::parse(&format!("{PIPER_VOICES_BASE}/{path}/{id}.onnx"))?;
    let config = Url::parse(&format!("{PIPER_VOICES_BASE}/{path}/{id}.onnx.json"))?;
    Ok(ResourceDescriptor::new(id)
        .with_location(ArtifactKind::Model, model)
        .with_location(ArtifactKind::Config, config)
        .with_metadata("sample_rate", DEFAULT_SAMPLE_RATE)
        .with_metadata("language", language))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_keeps_registration_order() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.list_ids(),
            vec!["de_DE-thorsten-high", "en_US-lessac-high", "en_GB-alan-medium"]
        );
    }

    #[test]
    fn describe_builtin_voice() {
        let registry = Registry::builtin();
        let voice = registry.describe(DEFAULT_VOICE).unwrap();
        assert_eq!(voice.sample_rate(), 22_050);
        assert_eq!(voice.language(), Some("de"));
        let model: Vec<_> = voice.locations(ArtifactKind::Model).collect();
        assert_eq!(
            model[0].as_str(),
            "https://huggingface.co/rhasspy/piper-voices/resolve/main/de/de_DE/thorsten/high/de_DE-thorsten-high.onnx"
        );
    }

    #[test]
    fn unknown_id_is_rejected() {
        let registry = Registry::builtin();
        let err = registry.describe("does-not-exist").unwrap_err();
        assert!(matches!(err, VoiceError::UnknownResource { ref id, .. } if id == "does-not-exist"));
    }

    #[test]
    fn catalog_extends_registry() {
        let mut registry = Registry::builtin();
        registry
            .extend_from_json(
                r#"[{
                    "id": "fr_FR-siwis-medium",
                    "model": ["https://mirror.example/a.onnx", "https://backup.example/a.onnx"],
                    "config": ["https://mirror.example/a.onnx.json"],
                    "sample_rate": 16000,
                    "language": "fr"
                }]"#,
            )
            .unwrap();

        let voice = registry.describe("fr_FR-siwis-medium").unwrap();
        assert_eq!(voice.sample_rate(), 16_000);
        assert_eq!(voice.locations(ArtifactKind::Model).count(), 2);
        assert_eq!(registry.list_ids().last().map(String::as_str), Some("fr_FR-siwis-medium"));
    }

    #[test]
    fn duplicate_and_incomplete_entries_fail() {
        let mut registry = Registry::builtin();
        let dup = registry.describe(DEFAULT_VOICE).unwrap().clone();
        assert!(matches!(registry.register(dup), Err(VoiceError::Catalog(_))));

        let missing_config = ResourceDescriptor::new("x").with_location(
            ArtifactKind::Model,
            Url::parse("https://example.com/x.onnx").unwrap(),
        );
        assert!(matches!(
            registry.register(missing_config),
            Err(VoiceError::Catalog(_))
        ));
    }

    #[test]
    fn ids_that_leave_the_models_dir_fail() {
        let mut registry = Registry::new();
        for id in ["../escaped", "..", ".", "", "/abs", "a/b", "a\\b", "C:"] {
            let descriptor = ResourceDescriptor::new(id)
                .with_location(ArtifactKind::Model, Url::parse("https://example.com/x.onnx").unwrap())
                .with_location(ArtifactKind::Config, Url::parse("https://example.com/x.json").unwrap());
            assert!(
                matches!(registry.register(descriptor), Err(VoiceError::Catalog(_))),
                "{id:?} was accepted"
            );
        }
        assert!(registry.list_ids().is_empty());

        let err = registry
            .extend_from_json(
                r#"[{"id": "../escaped", "model": ["https://e.example/m"], "config": ["https://e.example/c"]}]"#,
            )
            .unwrap_err();
        assert!(matches!(err, VoiceError::Catalog(_)));
    }
}
