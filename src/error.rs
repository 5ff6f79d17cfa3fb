//! Error taxonomy for voice acquisition and synthesis.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceError>;

#[derive(Error, Debug)]
pub enum VoiceError {
    /// The id is not part of the registry. Caller error, never retried.
    #[error("unknown voice `{id}`, available: {available}")]
    UnknownResource { id: String, available: String },

    /// Remote retrieval of an artifact did not complete. Safe to retry.
    #[error("failed to fetch voice `{id}`")]
    FetchFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The artifacts are on disk but could not be initialized into a voice.
    #[error("failed to load voice `{id}`")]
    LoadFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A handle was expected after a successful acquisition but was absent.
    #[error("voice `{id}` is not ready")]
    NotReady { id: String },

    /// The voice was ready but synthesis of the given text failed.
    #[error("synthesis with voice `{id}` failed")]
    Synthesis {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid voice catalog: {0}")]
    Catalog(String),
}

impl VoiceError {
    /// Whether a fresh attempt may succeed without outside intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, VoiceError::FetchFailed { .. })
    }

    pub fn fetch(id: impl Into<String>, source: anyhow::Error) -> Self {
        VoiceError::FetchFailed {
            id: id.into(),
            source,
        }
    }

    pub fn load(id: impl Into<String>, source: anyhow::Error) -> Self {
        VoiceError::LoadFailed {
            id: id.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fetch_failures_are_transient() {
        assert!(VoiceError::fetch("a", anyhow::anyhow!("timeout")).is_transient());
        assert!(!VoiceError::load("a", anyhow::anyhow!("bad json")).is_transient());
        assert!(!VoiceError::NotReady { id: "a".into() }.is_transient());
    }

    #[test]
    fn source_chain_is_kept() {
        let err = VoiceError::fetch("a", anyhow::anyhow!("connection reset"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection reset"));
    }
}
