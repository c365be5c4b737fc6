//! Cutoff estimation: given how long playback ran before an interruption,
//! how much of the message was actually said?
//!
//! Everything here is pure so an estimator can be queried after the stream
//! that produced it has been torn down.

use crate::config::SynthesisSettings;
use crate::text::{count_words, detokenize, tokenize};

/// Messages shorter than this are always allowed to finish
pub const MIN_WORDS_TO_INTERRUPT: usize = 4;

/// Fraction of the estimated duration after which a sentence is finished
pub const DEFAULT_FINISH_THRESHOLD: f64 = 0.8;

/// Maps elapsed playback seconds to the spoken prefix of a message
#[derive(Debug, Clone, PartialEq)]
pub enum CutoffEstimator {
    /// Prerecorded audio: the whole text counts as spoken
    Complete { text: String },
    /// Characters are spread evenly over the known output duration
    ProportionalLength { text: String, total_seconds: f64 },
    /// Words are spoken at a fixed rate
    WordRate { text: String, words_per_minute: u32 },
}

impl CutoffEstimator {
    pub fn complete(text: impl Into<String>) -> Self {
        CutoffEstimator::Complete { text: text.into() }
    }

    /// Estimator for fully synthesized audio of `output_bytes` bytes
    pub fn proportional(
        text: impl Into<String>,
        output_bytes: usize,
        settings: &SynthesisSettings,
    ) -> Self {
        CutoffEstimator::ProportionalLength {
            text: text.into(),
            total_seconds: settings.duration_of(output_bytes),
        }
    }

    pub fn word_rate(text: impl Into<String>, words_per_minute: u32) -> Self {
        CutoffEstimator::WordRate {
            text: text.into(),
            words_per_minute,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            CutoffEstimator::Complete { text }
            | CutoffEstimator::ProportionalLength { text, .. }
            | CutoffEstimator::WordRate { text, .. } => text,
        }
    }

    /// The part of the message plausibly spoken after `elapsed_seconds`
    pub fn spoken_prefix(&self, elapsed_seconds: f64) -> String {
        match self {
            CutoffEstimator::Complete { text } => text.clone(),
            CutoffEstimator::ProportionalLength {
                text,
                total_seconds,
            } => cutoff_from_total_length(text, elapsed_seconds, *total_seconds),
            CutoffEstimator::WordRate {
                text,
                words_per_minute,
            } => cutoff_from_word_rate(text, elapsed_seconds, *words_per_minute),
        }
    }
}

/// First `floor(elapsed / seconds_per_char)` characters of `text`
pub fn cutoff_from_total_length(text: &str, elapsed_seconds: f64, total_seconds: f64) -> String {
    if text.is_empty() {
        return text.to_string();
    }
    if total_seconds <= 0.0 {
        return text.to_string();
    }

    let char_count = text.chars().count();
    let seconds_per_char = total_seconds / char_count as f64;
    // Saturating cast: negative and NaN elapsed times speak nothing
    let spoken = (elapsed_seconds / seconds_per_char).floor() as usize;
    text.chars().take(spoken.min(char_count)).collect()
}

/// Detokenized first `floor(words_per_minute / 60 * elapsed)` tokens of `text`
pub fn cutoff_from_word_rate(text: &str, elapsed_seconds: f64, words_per_minute: u32) -> String {
    let words_per_second = words_per_minute as f64 / 60.0;
    let spoken = (words_per_second * elapsed_seconds).floor() as usize;
    let tokens = tokenize(text);
    detokenize(&tokens[..spoken.min(tokens.len())])
}

/// Quadratic estimate of speaking time from a message's token count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationModel {
    /// `[a, b, c]` for `a * n^2 + b * n + c`
    pub coefficients: [f64; 3],
}

impl Default for DurationModel {
    fn default() -> Self {
        // 150 tokens per minute
        Self {
            coefficients: [0.0, 0.4, 0.0],
        }
    }
}

impl DurationModel {
    pub fn new(coefficients: [f64; 3]) -> Self {
        Self { coefficients }
    }

    pub fn estimate_seconds(&self, message: &str) -> f64 {
        let n = tokenize(message).len() as f64;
        let [a, b, c] = self.coefficients;
        a * n * n + b * n + c
    }

    /// Whether an interrupted message should be allowed to finish.
    ///
    /// Short messages always finish; longer ones finish once
    /// `threshold` of their estimated duration has been spoken.
    pub fn should_finish_sentence(&self, message: &str, seconds_spoken: f64, threshold: f64) -> bool {
        if count_words(message) < MIN_WORDS_TO_INTERRUPT {
            return true;
        }
        seconds_spoken > threshold * self.estimate_seconds(message)
    }
}

/// [`DurationModel::should_finish_sentence`] with the default model and threshold
pub fn should_finish_sentence(message: &str, seconds_spoken: f64) -> bool {
    DurationModel::default().should_finish_sentence(message, seconds_spoken, DEFAULT_FINISH_THRESHOLD)
}
