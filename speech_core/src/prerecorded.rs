use bytes::Bytes;

use crate::config::SynthesisSettings;
use crate::decoder::PcmFormatter;
use crate::error::TtsResult;
use crate::estimator::CutoffEstimator;
use crate::splitter::ChunkSplitter;
use crate::stream::AudioChunkStream;
use crate::types::Message;
use crate::wav::read_wav;

const DEFAULT_SECONDS_PER_CHUNK: f64 = 1.0;

/// Audio recorded ahead of time (fillers, acknowledgements) for a fixed
/// message.
///
/// Played whole or not at all, so any interruption counts the entire
/// message as spoken.
#[derive(Debug, Clone)]
pub struct PrerecordedAudio {
    message: Message,
    audio: Bytes,
    settings: SynthesisSettings,
    is_interruptible: bool,
    seconds_per_chunk: f64,
}

impl PrerecordedAudio {
    /// Wrap audio already in the encoding and rate of `settings`
    pub fn new(message: Message, audio: impl Into<Bytes>, settings: SynthesisSettings) -> Self {
        Self {
            message,
            audio: audio.into(),
            settings,
            is_interruptible: false,
            seconds_per_chunk: DEFAULT_SECONDS_PER_CHUNK,
        }
    }

    /// Load a 16-bit WAV file and convert it to `settings`
    pub fn from_wav(message: Message, wav: &[u8], settings: SynthesisSettings) -> TtsResult<Self> {
        let parsed = read_wav(wav)?;
        let mut formatter = PcmFormatter::new(parsed.sample_rate, parsed.channels, &settings)?;
        let mut audio = formatter.format(&parsed.samples)?;
        audio.extend(formatter.finish()?);
        Ok(Self::new(message, audio, settings))
    }

    pub fn interruptible(mut self, is_interruptible: bool) -> Self {
        self.is_interruptible = is_interruptible;
        self
    }

    pub fn with_seconds_per_chunk(mut self, seconds_per_chunk: f64) -> Self {
        self.seconds_per_chunk = seconds_per_chunk;
        self
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn is_interruptible(&self) -> bool {
        self.is_interruptible
    }

    pub fn audio(&self) -> &Bytes {
        &self.audio
    }

    pub fn duration_seconds(&self) -> f64 {
        self.settings.duration_of(self.audio.len())
    }

    /// Fresh frame stream over the recording
    pub fn create_stream(&self) -> TtsResult<AudioChunkStream> {
        let chunk_size = self.settings.chunk_size(self.seconds_per_chunk);
        let splitter = ChunkSplitter::for_settings(self.audio.clone(), &self.settings, chunk_size)?;
        Ok(AudioChunkStream::from_buffer(
            splitter,
            CutoffEstimator::complete(self.message.text.clone()),
        ))
    }
}
