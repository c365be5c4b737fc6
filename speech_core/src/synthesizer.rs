use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::cache::{fingerprint, CacheValue, ResponseCache};
use crate::config::{StreamConfig, SynthesisSettings};
use crate::decoder::{decode_all, make_decoder, SourceFormat};
use crate::error::{TtsError, TtsResult};
use crate::estimator::CutoffEstimator;
use crate::pipeline::{CacheSink, DecodePipeline, PipelineOptions};
use crate::splitter::ChunkSplitter;
use crate::stream::AudioChunkStream;
use crate::types::{ByteStream, Message, SynthesisContext};

/// What a backend hands back for one request
pub enum BackendAudio {
    /// The whole response, already read
    Complete(Bytes),
    /// An open response body still arriving
    Streaming(ByteStream),
}

impl std::fmt::Debug for BackendAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendAudio::Complete(bytes) => f.debug_tuple("Complete").field(&bytes.len()).finish(),
            BackendAudio::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// A text-to-speech provider
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        settings: &SynthesisSettings,
        context: &SynthesisContext,
    ) -> TtsResult<BackendAudio>;

    /// Format of the audio `synthesize` returns
    fn output_format(&self) -> SourceFormat;

    /// Voice/model identity folded into cache keys
    fn cache_namespace(&self) -> &str;
}

/// Turns messages into [`AudioChunkStream`]s through a backend and an
/// optional response cache
pub struct Synthesizer {
    backend: Arc<dyn SpeechBackend>,
    cache: Option<Arc<ResponseCache>>,
    settings: SynthesisSettings,
    words_per_minute: u32,
    read_timeout: Duration,
    output_capacity: usize,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn SpeechBackend>, settings: SynthesisSettings) -> Self {
        let defaults = StreamConfig::default();
        Self {
            backend,
            cache: None,
            settings,
            words_per_minute: defaults.words_per_minute,
            read_timeout: defaults.read_timeout(),
            output_capacity: defaults.output_queue_capacity,
        }
    }

    pub fn from_config(
        backend: Arc<dyn SpeechBackend>,
        config: &StreamConfig,
        cache: Option<Arc<ResponseCache>>,
    ) -> TtsResult<Self> {
        Ok(Self {
            backend,
            cache,
            settings: config.settings()?,
            words_per_minute: config.words_per_minute,
            read_timeout: config.read_timeout(),
            output_capacity: config.output_queue_capacity,
        })
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_words_per_minute(mut self, words_per_minute: u32) -> Self {
        self.words_per_minute = words_per_minute;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    pub fn cache_key(&self, text: &str) -> String {
        fingerprint(text, &self.settings, self.backend.cache_namespace())
    }

    /// Start speaking `message`, in frames of `chunk_size` bytes
    pub async fn create_speech(
        &self,
        message: &Message,
        chunk_size: usize,
        context: &SynthesisContext,
    ) -> TtsResult<AudioChunkStream> {
        if chunk_size == 0 {
            return Err(TtsError::InvalidSettings(
                "Chunk size must be greater than zero".to_string(),
            ));
        }
        if message.text.trim().is_empty() {
            debug!(message_id = %message.id, "Empty message, nothing to synthesize");
            return AudioChunkStream::empty();
        }

        let key = self.cache_key(&message.text);
        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Some(CacheValue::Bytes(raw)) => {
                    info!(message_id = %message.id, bytes = raw.len(), "Serving speech from cache");
                    return self.buffered_stream(message, raw, chunk_size).await;
                }
                Some(_) => debug!(key = %key, "Ignoring non-audio cache entry"),
                None => {}
            }
        }

        match self
            .backend
            .synthesize(&message.text, &self.settings, context)
            .await?
        {
            BackendAudio::Complete(raw) => {
                debug!(message_id = %message.id, bytes = raw.len(), "Backend returned complete audio");
                if let Some(cache) = &self.cache {
                    cache.set(&key, CacheValue::Bytes(raw.clone())).await;
                }
                self.buffered_stream(message, raw, chunk_size).await
            }
            BackendAudio::Streaming(source) => {
                debug!(message_id = %message.id, "Backend returned streaming audio");
                let decoder = make_decoder(self.backend.output_format(), &self.settings)?;
                let options = PipelineOptions {
                    chunk_size,
                    read_timeout: self.read_timeout,
                    output_capacity: self.output_capacity,
                };
                let mut pipeline = DecodePipeline::new(decoder, options)?;
                let sink = self.cache.as_ref().map(|cache| CacheSink {
                    cache: Arc::clone(cache),
                    key,
                });
                pipeline.start(source, sink)?;

                let wav_sample_rate = self
                    .settings
                    .should_encode_as_wav()
                    .then(|| self.settings.sampling_rate());
                Ok(AudioChunkStream::from_pipeline(
                    pipeline,
                    CutoffEstimator::word_rate(message.text.clone(), self.words_per_minute),
                    wav_sample_rate,
                ))
            }
        }
    }

    /// Decode a complete backend payload and split it into frames
    async fn buffered_stream(
        &self,
        message: &Message,
        raw: Bytes,
        chunk_size: usize,
    ) -> TtsResult<AudioChunkStream> {
        let mut decoder = make_decoder(self.backend.output_format(), &self.settings)?;
        let decoded = tokio::task::spawn_blocking(move || decode_all(decoder.as_mut(), &raw))
            .await
            .map_err(|e| TtsError::Worker(format!("Task join error: {e}")))??;

        let estimator =
            CutoffEstimator::proportional(message.text.clone(), decoded.len(), &self.settings);
        let splitter = ChunkSplitter::for_settings(decoded, &self.settings, chunk_size)?;
        Ok(AudioChunkStream::from_buffer(splitter, estimator))
    }
}
