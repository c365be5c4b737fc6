use bytes::Bytes;
use futures::Stream;
use tracing::error;

use crate::error::TtsResult;
use crate::estimator::CutoffEstimator;
use crate::pipeline::{DecodePipeline, WorkerStatus};
use crate::splitter::ChunkSplitter;
use crate::types::AudioFrame;
use crate::wav::encode_as_wav;

enum FrameSource {
    Buffered(ChunkSplitter),
    Streaming {
        pipeline: DecodePipeline,
        wav_sample_rate: Option<u32>,
    },
    Exhausted,
}

/// Lazy, single-pass audio for one message plus its cutoff estimator.
///
/// Frames are pulled with [`next_frame`](Self::next_frame); exactly one of
/// them is final and nothing follows it. Dropping the stream tears down any
/// decode pipeline behind it.
pub struct AudioChunkStream {
    source: FrameSource,
    estimator: CutoffEstimator,
}

impl AudioChunkStream {
    /// Stream over a fully synthesized buffer
    pub fn from_buffer(splitter: ChunkSplitter, estimator: CutoffEstimator) -> Self {
        Self {
            source: FrameSource::Buffered(splitter),
            estimator,
        }
    }

    /// Stream over a started decode pipeline, WAV-framing each frame when
    /// `wav_sample_rate` is set
    pub fn from_pipeline(
        pipeline: DecodePipeline,
        estimator: CutoffEstimator,
        wav_sample_rate: Option<u32>,
    ) -> Self {
        Self {
            source: FrameSource::Streaming {
                pipeline,
                wav_sample_rate,
            },
            estimator,
        }
    }

    /// A single empty final frame; nothing counts as spoken
    pub fn empty() -> TtsResult<Self> {
        Ok(Self::from_buffer(
            ChunkSplitter::new(Bytes::new(), 1)?,
            CutoffEstimator::complete(""),
        ))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.source, FrameSource::Streaming { .. })
    }

    /// Next frame, or `None` once the final frame has been returned
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        let frame = match &mut self.source {
            FrameSource::Buffered(splitter) => splitter.next(),
            FrameSource::Streaming {
                pipeline,
                wav_sample_rate,
            } => pipeline.next_frame().await.map(|frame| match wav_sample_rate {
                Some(rate) => match encode_as_wav(&frame.data, *rate) {
                    Ok(wav) => AudioFrame::new(wav, frame.is_final),
                    Err(e) => {
                        error!(error = %e, "WAV framing failed, sending raw frame");
                        frame
                    }
                },
                None => frame,
            }),
            FrameSource::Exhausted => None,
        };

        match &frame {
            Some(frame) if frame.is_final => self.source = FrameSource::Exhausted,
            None => self.source = FrameSource::Exhausted,
            _ => {}
        }
        frame
    }

    /// Text plausibly spoken after `elapsed_seconds` of playback
    pub fn spoken_prefix(&self, elapsed_seconds: f64) -> String {
        self.estimator.spoken_prefix(elapsed_seconds)
    }

    /// Owned estimator that outlives the stream
    pub fn estimator(&self) -> CutoffEstimator {
        self.estimator.clone()
    }

    /// Decode worker status for streamed audio
    pub fn worker_status(&self) -> Option<WorkerStatus> {
        match &self.source {
            FrameSource::Streaming { pipeline, .. } => Some(pipeline.worker_status()),
            _ => None,
        }
    }

    /// Stop producing frames and wait for any decode worker to exit
    pub async fn cancel(&mut self) -> TtsResult<()> {
        let source = std::mem::replace(&mut self.source, FrameSource::Exhausted);
        if let FrameSource::Streaming { mut pipeline, .. } = source {
            pipeline.shutdown().await?;
        }
        Ok(())
    }

    /// Adapt into a [`futures::Stream`] of frames
    pub fn into_stream(mut self) -> impl Stream<Item = AudioFrame> + Send {
        async_stream::stream! {
            while let Some(frame) = self.next_frame().await {
                yield frame;
            }
        }
    }
}

impl std::fmt::Debug for AudioChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            FrameSource::Buffered(_) => "buffered",
            FrameSource::Streaming { .. } => "streaming",
            FrameSource::Exhausted => "exhausted",
        };
        f.debug_struct("AudioChunkStream")
            .field("source", &source)
            .field("estimator", &self.estimator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_empty_stream() {
        let mut stream = AudioChunkStream::empty().unwrap();
        assert_eq!(stream.next_frame().await, Some(AudioFrame::final_empty()));
        assert_eq!(stream.next_frame().await, None);
        assert_eq!(stream.spoken_prefix(10.0), "");
        assert!(stream.worker_status().is_none());
    }

    #[tokio::test]
    async fn test_buffered_stream_ends_after_final_frame() {
        let splitter = ChunkSplitter::new(vec![0u8; 10], 4).unwrap();
        let stream = AudioChunkStream::from_buffer(splitter, CutoffEstimator::complete("hi"));

        let frames: Vec<AudioFrame> = stream.into_stream().collect().await;
        assert_eq!(frames.len(), 3);
        assert!(frames[2].is_final);
    }

    #[tokio::test]
    async fn test_estimator_survives_stream() {
        let splitter = ChunkSplitter::new(vec![0u8; 4], 4).unwrap();
        let stream = AudioChunkStream::from_buffer(
            splitter,
            CutoffEstimator::word_rate("hello there friend", 150),
        );
        let estimator = stream.estimator();
        drop(stream);
        assert_eq!(estimator.spoken_prefix(0.8), "hello there");
    }
}
