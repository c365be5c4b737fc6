use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::TtsResult;

/// A message to be spoken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One playback-ready slice of audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub is_final: bool,
}

impl AudioFrame {
    pub fn new(data: impl Into<Bytes>, is_final: bool) -> Self {
        Self {
            data: data.into(),
            is_final,
        }
    }

    /// Zero-length frame that closes a stream
    pub fn final_empty() -> Self {
        Self::new(Bytes::new(), true)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Extra request context forwarded to the synthesis backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisContext {
    /// Emotion the agent should convey, e.g. "cheerful"
    pub sentiment: Option<String>,
    pub conversation_id: Option<String>,
}

/// Incrementally arriving backend audio
pub type ByteStream = Pin<Box<dyn Stream<Item = TtsResult<Bytes>> + Send>>;
