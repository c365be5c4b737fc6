//! Streaming speech synthesis for interruptible voice conversations.
//!
//! A [`Synthesizer`] asks a [`SpeechBackend`] for audio, serves repeats from
//! a two-tier [`ResponseCache`], and hands back an [`AudioChunkStream`]:
//! fixed-size playback frames plus a [`CutoffEstimator`] that says how much
//! of the message had been spoken when playback stopped.

mod cache;
mod codec;
mod config;
mod decoder;
mod error;
mod estimator;
mod pipeline;
mod prerecorded;
mod splitter;
mod stream;
mod synthesizer;
mod text;
mod types;
mod wav;

pub use cache::{fingerprint, CacheValue, InMemoryStore, RemoteStore, ResponseCache};
pub use codec::{linear_to_mulaw, mulaw_to_linear};
pub use config::{AudioEncoding, StreamConfig, SynthesisSettings, MULAW_SAMPLE_RATE};
pub use decoder::{
    decode_all, make_decoder, Mp3StreamDecoder, PcmFormatter, PcmStreamDecoder, SourceFormat,
    StreamDecoder,
};
pub use error::{TtsError, TtsResult};
pub use estimator::{
    cutoff_from_total_length, cutoff_from_word_rate, should_finish_sentence, CutoffEstimator,
    DurationModel, DEFAULT_FINISH_THRESHOLD, MIN_WORDS_TO_INTERRUPT,
};
pub use pipeline::{
    CacheSink, DecodePipeline, DecoderInput, PipelineOptions, PipelineState, WorkerStatus,
};
pub use prerecorded::PrerecordedAudio;
pub use splitter::ChunkSplitter;
pub use stream::AudioChunkStream;
pub use synthesizer::{BackendAudio, SpeechBackend, Synthesizer};
pub use text::{count_words, detokenize, make_disfluency, tokenize};
pub use types::{AudioFrame, ByteStream, Message, SynthesisContext};
pub use wav::{encode_as_wav, read_wav, WavAudio};
