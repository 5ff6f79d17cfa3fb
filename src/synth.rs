//! Public entry points: make sure the voice is ready, then speak.

use crate::{
    cache::{VoiceCache, VoiceStatus},
    error::{Result, VoiceError},
    registry::ResourceDescriptor,
    wav,
};

#[derive(Clone)]
pub struct Synthesizer {
    cache: VoiceCache,
}

impl Synthesizer {
    pub fn new(cache: VoiceCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &VoiceCache {
        &self.cache
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.cache.registry().list_ids()
    }

    pub fn describe(&self, id: &str) -> Result<ResourceDescriptor> {
        self.cache.registry().describe(id).cloned()
    }

    pub async fn status(&self) -> Vec<VoiceStatus> {
        self.cache.status().await
    }

    /// Speaks all non-blank segments as one utterance and returns a single WAV
    /// container. Returns an empty buffer, without touching the voice, when
    /// there is nothing to say.
    pub async fn synthesize_batch<S: AsRef<str>>(&self, segments: &[S], id: &str) -> Result<Vec<u8>> {
        let text = join_segments(segments);
        if text.is_empty() {
            return Ok(Vec::new());
        }
        self.speak(&text, id).await
    }

    /// [`Self::synthesize_batch`], base64 encoded.
    pub async fn synthesize_batch_base64<S: AsRef<str>>(
        &self,
        segments: &[S],
        id: &str,
    ) -> Result<String> {
        Ok(wav::to_base64(&self.synthesize_batch(segments, id).await?))
    }

    /// Speaks `text` verbatim. Empty text is still handed to the voice.
    pub async fn synthesize_one(&self, text: &str, id: &str) -> Result<Vec<u8>> {
        self.speak(text, id).await
    }

    async fn speak(&self, text: &str, id: &str) -> Result<Vec<u8>> {
        let voice = self.cache.ensure_ready(id).await?;

        let audio = voice
            .synthesize(text)
            .await
            .map_err(|source| VoiceError::Synthesis {
                id: id.to_string(),
                source,
            })?;
        tracing::debug!(
            "Synthesized {} samples at {} Hz with {id}",
            audio.samples.len(),
            audio.sample_rate
        );
        check_sample_rate(self.cache.registry().describe(id)?, audio.sample_rate);
        wav::encode(&audio).map_err(|source| VoiceError::Synthesis {
            id: id.to_string(),
            source,
        })
    }
}

/// The WAV header follows the voice; a catalog that disagrees is only
/// reported. Returns whether both agree.
fn check_sample_rate(descriptor: &ResourceDescriptor, voice_rate: u32) -> bool {
    let expected = descriptor.sample_rate();
    if expected != voice_rate {
        tracing::warn!(
            "Voice {} produced {voice_rate} Hz but its catalog entry says {expected} Hz",
            descriptor.id
        );
        return false;
    }
    true
}

/// Trims every segment, drops blank ones and joins the rest with one space.
pub fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::CacheConfig,
        registry::{DEFAULT_VOICE, Registry},
        testing::{MockFetcher, MockLoader, MockVoice},
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        synth: Synthesizer,
        fetcher: Arc<MockFetcher>,
        loader: Arc<MockLoader>,
    }

    fn fixture(loader: MockLoader) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default()
            .with_models_dir(dir.path())
            .with_poll_interval(Duration::from_millis(10));
        let fetcher = Arc::new(MockFetcher::new());
        let loader = Arc::new(loader);
        let cache = VoiceCache::new(
            Registry::builtin(),
            &config,
            fetcher.clone(),
            loader.clone(),
        );
        Fixture {
            _dir: dir,
            synth: Synthesizer::new(cache),
            fetcher,
            loader,
        }
    }

    #[test]
    fn joins_trimmed_segments() {
        assert_eq!(join_segments(&["Hello", " world "]), "Hello world");
        assert_eq!(join_segments(&["", "  ", "\tone\n"]), "one");
        assert_eq!(join_segments::<&str>(&[]), "");
    }

    #[tokio::test]
    async fn blank_batch_never_touches_the_voice() {
        let f = fixture(MockLoader::new());

        assert!(f.synth.synthesize_batch::<&str>(&[], DEFAULT_VOICE).await.unwrap().is_empty());
        assert!(f.synth.synthesize_batch(&["", "  "], DEFAULT_VOICE).await.unwrap().is_empty());
        assert_eq!(
            f.synth.synthesize_batch_base64(&["  "], DEFAULT_VOICE).await.unwrap(),
            ""
        );

        assert_eq!(f.fetcher.calls(), 0);
        assert_eq!(f.loader.loads(), 0);
        assert!(f.loader.voice().spoken().is_empty());
    }

    #[tokio::test]
    async fn batch_speaks_joined_text_once() {
        let f = fixture(MockLoader::new());

        let wav = f
            .synth
            .synthesize_batch(&["Hello", " world "], DEFAULT_VOICE)
            .await
            .unwrap();

        assert_eq!(f.loader.voice().spoken(), vec!["Hello world"]);
        assert_eq!(&wav[..4], b"RIFF");
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 22_050);
        assert_eq!(reader.len(), "Hello world".len() as u32);
    }

    #[tokio::test]
    async fn single_text_is_not_trimmed_or_skipped() {
        let f = fixture(MockLoader::new());

        f.synth.synthesize_one("", DEFAULT_VOICE).await.unwrap();
        f.synth.synthesize_one(" hi ", DEFAULT_VOICE).await.unwrap();

        assert_eq!(f.loader.voice().spoken(), vec!["", " hi "]);
        assert_eq!(f.loader.loads(), 1);
    }

    #[tokio::test]
    async fn acquisition_errors_pass_through() {
        let f = fixture(MockLoader::new().failing_next(1));

        let err = f.synth.synthesize_batch(&["Hallo"], DEFAULT_VOICE).await.unwrap_err();
        assert!(matches!(err, VoiceError::LoadFailed { .. }));

        let err = f.synth.synthesize_one("Hallo", "nope").await.unwrap_err();
        assert!(matches!(err, VoiceError::UnknownResource { .. }));
        assert!(matches!(
            f.synth.describe("nope"),
            Err(VoiceError::UnknownResource { .. })
        ));
    }

    #[tokio::test]
    async fn synthesis_failure_is_distinct() {
        let f = fixture(MockLoader::with_voice(Arc::new(MockVoice::failing(16_000))));

        let err = f.synth.synthesize_one("x", DEFAULT_VOICE).await.unwrap_err();
        assert!(matches!(err, VoiceError::Synthesis { .. }));
        assert!(f.synth.cache().is_loaded(DEFAULT_VOICE).unwrap());
    }

    #[tokio::test]
    async fn wav_rate_follows_voice_when_catalog_disagrees() {
        let f = fixture(MockLoader::with_voice(Arc::new(MockVoice::new(16_000))));

        let wav = f.synth.synthesize_one("hallo", DEFAULT_VOICE).await.unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        let descriptor = f.synth.describe(DEFAULT_VOICE).unwrap();
        assert!(!check_sample_rate(&descriptor, 16_000));
        assert!(check_sample_rate(&descriptor, 22_050));
    }
}
