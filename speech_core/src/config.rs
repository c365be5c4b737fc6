// Audio settings and runtime configuration for the synthesis pipeline

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{TtsError, TtsResult};

/// The only sampling rate µ-law output may use
pub const MULAW_SAMPLE_RATE: u32 = 8000;

/// Sample encoding of the audio handed to the playback consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit little-endian signed PCM
    Linear16,
    /// G.711 µ-law, one byte per sample
    Mulaw,
}

impl AudioEncoding {
    /// Bytes used by a single mono sample
    pub fn sample_width(self) -> usize {
        match self {
            AudioEncoding::Linear16 => 2,
            AudioEncoding::Mulaw => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudioEncoding::Linear16 => "linear16",
            AudioEncoding::Mulaw => "mulaw",
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioEncoding {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear16" | "pcm" | "pcm16" => Ok(AudioEncoding::Linear16),
            "mulaw" | "ulaw" | "mu-law" => Ok(AudioEncoding::Mulaw),
            other => Err(TtsError::InvalidSettings(format!(
                "Unknown audio encoding: {other}. Expected linear16 or mulaw"
            ))),
        }
    }
}

/// Output format of a synthesis request.
///
/// Always built through [`SynthesisSettings::new`], which enforces that µ-law
/// runs at 8 kHz and that WAV framing is only used for 16-bit PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisSettings {
    sampling_rate: u32,
    audio_encoding: AudioEncoding,
    should_encode_as_wav: bool,
}

impl SynthesisSettings {
    pub fn new(
        sampling_rate: u32,
        audio_encoding: AudioEncoding,
        should_encode_as_wav: bool,
    ) -> TtsResult<Self> {
        if sampling_rate == 0 {
            return Err(TtsError::InvalidSettings(
                "Sampling rate must be greater than zero".to_string(),
            ));
        }
        if audio_encoding == AudioEncoding::Mulaw && sampling_rate != MULAW_SAMPLE_RATE {
            return Err(TtsError::InvalidSettings(format!(
                "MuLaw encoding only supports {MULAW_SAMPLE_RATE} Hz, got {sampling_rate} Hz"
            )));
        }
        if audio_encoding == AudioEncoding::Mulaw && should_encode_as_wav {
            return Err(TtsError::InvalidSettings(
                "WAV framing requires linear16 encoding".to_string(),
            ));
        }
        Ok(Self {
            sampling_rate,
            audio_encoding,
            should_encode_as_wav,
        })
    }

    /// Raw 16-bit PCM at the given rate, no WAV framing
    pub fn linear16(sampling_rate: u32) -> TtsResult<Self> {
        Self::new(sampling_rate, AudioEncoding::Linear16, false)
    }

    /// Telephony µ-law at 8 kHz
    pub fn mulaw() -> Self {
        Self {
            sampling_rate: MULAW_SAMPLE_RATE,
            audio_encoding: AudioEncoding::Mulaw,
            should_encode_as_wav: false,
        }
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn audio_encoding(&self) -> AudioEncoding {
        self.audio_encoding
    }

    pub fn should_encode_as_wav(&self) -> bool {
        self.should_encode_as_wav
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sampling_rate as usize * self.audio_encoding.sample_width()
    }

    /// Frame size in bytes for `seconds_per_chunk` of audio.
    ///
    /// Rounded down to a whole sample and never smaller than one sample.
    pub fn chunk_size(&self, seconds_per_chunk: f64) -> usize {
        let width = self.audio_encoding.sample_width();
        let raw = (self.bytes_per_second() as f64 * seconds_per_chunk.max(0.0)) as usize;
        (raw / width * width).max(width)
    }

    /// Seconds of audio represented by `byte_count` bytes of output
    pub fn duration_of(&self, byte_count: usize) -> f64 {
        byte_count as f64 / self.bytes_per_second() as f64
    }
}

/// Runtime knobs for the pipeline, loaded from the environment
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub sampling_rate: u32,
    pub audio_encoding: AudioEncoding,
    pub should_encode_as_wav: bool,
    pub seconds_per_chunk: f64,
    pub words_per_minute: u32,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub read_timeout_secs: u64,
    pub output_queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 16000,
            audio_encoding: AudioEncoding::Linear16,
            should_encode_as_wav: false,
            seconds_per_chunk: 0.5,
            words_per_minute: 150,
            cache_capacity: 2048,
            cache_ttl_secs: 60 * 60 * 24,
            read_timeout_secs: 15,
            output_queue_capacity: 64,
        }
    }
}

impl StreamConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let sampling_rate = env_or("SAMPLING_RATE", defaults.sampling_rate);

        let audio_encoding = std::env::var("AUDIO_ENCODING")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.audio_encoding);

        let should_encode_as_wav = std::env::var("ENCODE_AS_WAV")
            .ok()
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.should_encode_as_wav);

        let seconds_per_chunk = env_or("SECONDS_PER_CHUNK", defaults.seconds_per_chunk);
        let words_per_minute = env_or("WORDS_PER_MINUTE", defaults.words_per_minute);
        let cache_capacity = env_or("CACHE_CAPACITY", defaults.cache_capacity);
        let cache_ttl_secs = env_or("CACHE_TTL_SECONDS", defaults.cache_ttl_secs);
        let read_timeout_secs = env_or("STREAM_READ_TIMEOUT_SECS", defaults.read_timeout_secs);
        let output_queue_capacity =
            env_or("OUTPUT_QUEUE_CAPACITY", defaults.output_queue_capacity);

        Self {
            sampling_rate,
            audio_encoding,
            should_encode_as_wav,
            seconds_per_chunk,
            words_per_minute,
            cache_capacity,
            cache_ttl_secs,
            read_timeout_secs,
            output_queue_capacity,
        }
    }

    /// Validated synthesis settings for this configuration
    pub fn settings(&self) -> TtsResult<SynthesisSettings> {
        SynthesisSettings::new(
            self.sampling_rate,
            self.audio_encoding,
            self.should_encode_as_wav,
        )
    }

    pub fn chunk_size(&self) -> TtsResult<usize> {
        Ok(self.settings()?.chunk_size(self.seconds_per_chunk))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_requires_8khz() {
        let result = SynthesisSettings::new(16000, AudioEncoding::Mulaw, false);
        assert!(result.is_err());
        if let Err(TtsError::InvalidSettings(msg)) = result {
            assert!(msg.contains("8000"));
        }

        assert!(SynthesisSettings::new(8000, AudioEncoding::Mulaw, false).is_ok());
    }

    #[test]
    fn test_wav_framing_requires_linear16() {
        assert!(SynthesisSettings::new(8000, AudioEncoding::Mulaw, true).is_err());
        assert!(SynthesisSettings::new(8000, AudioEncoding::Linear16, true).is_ok());
    }

    #[test]
    fn test_zero_sampling_rate_rejected() {
        assert!(SynthesisSettings::linear16(0).is_err());
    }

    #[test]
    fn test_chunk_size_is_whole_samples() {
        let settings = SynthesisSettings::linear16(16000).unwrap();
        assert_eq!(settings.chunk_size(1.0), 32000);
        assert_eq!(settings.chunk_size(0.1), 3200);
        // 22050 * 2 * 0.1 = 4410 bytes, already even
        let odd = SynthesisSettings::linear16(22050).unwrap();
        assert_eq!(odd.chunk_size(0.1) % 2, 0);
        // Never below a single sample
        assert_eq!(settings.chunk_size(0.0), 2);

        assert_eq!(SynthesisSettings::mulaw().chunk_size(0.5), 4000);
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("LINEAR16".parse::<AudioEncoding>().unwrap(), AudioEncoding::Linear16);
        assert_eq!("mulaw".parse::<AudioEncoding>().unwrap(), AudioEncoding::Mulaw);
        assert!("opus".parse::<AudioEncoding>().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = StreamConfig::default();
        let settings = config.settings().unwrap();
        assert_eq!(settings.sampling_rate(), 16000);
        assert_eq!(config.chunk_size().unwrap(), 16000);
        assert_eq!(config.cache_ttl(), Duration::from_secs(86400));
    }
}
