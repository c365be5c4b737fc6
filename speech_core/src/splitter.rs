use bytes::Bytes;
use tracing::error;

use crate::config::SynthesisSettings;
use crate::error::{TtsError, TtsResult};
use crate::types::AudioFrame;
use crate::wav::encode_as_wav;

/// Lazily cuts an in-memory buffer into fixed-size frames.
///
/// Exactly one frame is marked final and it is always the last one. An empty
/// buffer still produces that final (empty) frame.
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    data: Bytes,
    chunk_size: usize,
    offset: usize,
    wav_sample_rate: Option<u32>,
    done: bool,
}

impl ChunkSplitter {
    pub fn new(data: impl Into<Bytes>, chunk_size: usize) -> TtsResult<Self> {
        if chunk_size == 0 {
            return Err(TtsError::InvalidSettings(
                "Chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            data: data.into(),
            chunk_size,
            offset: 0,
            wav_sample_rate: None,
            done: false,
        })
    }

    /// Splitter that applies WAV framing when the settings ask for it
    pub fn for_settings(
        data: impl Into<Bytes>,
        settings: &SynthesisSettings,
        chunk_size: usize,
    ) -> TtsResult<Self> {
        let splitter = Self::new(data, chunk_size)?;
        Ok(if settings.should_encode_as_wav() {
            splitter.wrap_as_wav(settings.sampling_rate())
        } else {
            splitter
        })
    }

    /// Wrap every emitted slice in its own WAV header
    pub fn wrap_as_wav(mut self, sample_rate: u32) -> Self {
        self.wav_sample_rate = Some(sample_rate);
        self
    }

    /// Total bytes of audio behind this splitter, before any framing
    pub fn total_len(&self) -> usize {
        self.data.len()
    }
}

impl Iterator for ChunkSplitter {
    type Item = AudioFrame;

    fn next(&mut self) -> Option<AudioFrame> {
        if self.done {
            return None;
        }

        let end = (self.offset + self.chunk_size).min(self.data.len());
        let slice = self.data.slice(self.offset..end);
        let is_final = end >= self.data.len();
        self.offset = end;
        self.done = is_final;

        let payload = match self.wav_sample_rate {
            Some(rate) => match encode_as_wav(&slice, rate) {
                Ok(wav) => Bytes::from(wav),
                Err(e) => {
                    error!(error = %e, "WAV framing failed, sending raw frame");
                    slice
                }
            },
            None => slice,
        };
        Some(AudioFrame::new(payload, is_final))
    }
}
