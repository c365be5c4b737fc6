//! Cross-thread decode pipeline for streaming backend responses.
//!
//! ```text
//! network ──producer task──▶ input queue ──decode worker──▶ output queue ──▶ consumer
//!            (async)          (unbounded)   (blocking)       (bounded)
//! ```
//!
//! The producer also keeps a copy of the raw response and writes it to the
//! response cache once the network stream ends, even if the consumer walked
//! away early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cache::{CacheValue, ResponseCache};
use crate::config::StreamConfig;
use crate::decoder::StreamDecoder;
use crate::error::{TtsError, TtsResult};
use crate::types::{AudioFrame, ByteStream};

/// Item on the decode worker's input queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderInput {
    Chunk(Bytes),
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Target frame size in bytes
    pub chunk_size: usize,
    /// Longest wait for the next network chunk
    pub read_timeout: Duration,
    /// Decoded frames buffered ahead of the consumer
    pub output_capacity: usize,
}

impl PipelineOptions {
    pub fn new(chunk_size: usize) -> Self {
        let defaults = StreamConfig::default();
        Self {
            chunk_size,
            read_timeout: defaults.read_timeout(),
            output_capacity: defaults.output_queue_capacity,
        }
    }

    pub fn from_config(config: &StreamConfig) -> TtsResult<Self> {
        Ok(Self {
            chunk_size: config.chunk_size()?,
            read_timeout: config.read_timeout(),
            output_capacity: config.output_queue_capacity,
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_output_capacity(mut self, output_capacity: usize) -> Self {
        self.output_capacity = output_capacity;
        self
    }
}

/// Where the producer commits the raw response once the stream ends
#[derive(Clone)]
pub struct CacheSink {
    pub cache: Arc<ResponseCache>,
    pub key: String,
}

/// Reports whether a pipeline's decode worker thread is still running
#[derive(Debug, Clone)]
pub struct WorkerStatus(Arc<AtomicBool>);

impl WorkerStatus {
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Sending side of the input queue, shared by the producer and the pipeline.
///
/// Closing it drops the only sender, so nothing reaches the worker after
/// the pipeline terminates.
#[derive(Clone)]
struct InputGate(Arc<Mutex<Option<mpsc::UnboundedSender<DecoderInput>>>>);

impl InputGate {
    fn new() -> (Self, mpsc::UnboundedReceiver<DecoderInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    /// False once the gate is closed or the worker is gone
    fn send(&self, input: DecoderInput) -> bool {
        let sender = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(input).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn is_open(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

/// Clears the alive flag however the worker exits
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One streaming decode session.
///
/// Single use: once terminated it cannot be started again.
pub struct DecodePipeline {
    state: PipelineState,
    decoder: Option<Box<dyn StreamDecoder>>,
    options: PipelineOptions,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    input: Option<InputGate>,
    output_rx: Option<mpsc::Receiver<AudioFrame>>,
    worker: Option<JoinHandle<()>>,
}

impl DecodePipeline {
    pub fn new(decoder: Box<dyn StreamDecoder>, options: PipelineOptions) -> TtsResult<Self> {
        if options.chunk_size == 0 {
            return Err(TtsError::InvalidSettings(
                "Chunk size must be greater than zero".to_string(),
            ));
        }
        if options.output_capacity == 0 {
            return Err(TtsError::InvalidSettings(
                "Output queue capacity must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            state: PipelineState::Idle,
            decoder: Some(decoder),
            options,
            stop: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(false)),
            input: None,
            output_rx: None,
            worker: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn worker_status(&self) -> WorkerStatus {
        WorkerStatus(Arc::clone(&self.alive))
    }

    /// Spawn the decode worker and the network producer
    pub fn start(&mut self, source: ByteStream, sink: Option<CacheSink>) -> TtsResult<()> {
        if self.state != PipelineState::Idle {
            return Err(TtsError::InvalidState(format!(
                "Cannot start a pipeline in state {:?}",
                self.state
            )));
        }
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| TtsError::InvalidState("Decoder already consumed".to_string()))?;

        let (input, input_rx) = InputGate::new();
        let (output_tx, output_rx) = mpsc::channel::<AudioFrame>(self.options.output_capacity);

        self.alive.store(true, Ordering::Release);
        let guard = AliveGuard(Arc::clone(&self.alive));
        let stop = Arc::clone(&self.stop);
        let chunk_size = self.options.chunk_size;
        self.worker = Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            run_worker(decoder, input_rx, output_tx, chunk_size, stop);
        }));

        tokio::spawn(run_producer(
            source,
            input.clone(),
            self.options.read_timeout,
            sink,
        ));

        self.input = Some(input);
        self.output_rx = Some(output_rx);
        self.state = PipelineState::Running;
        debug!(chunk_size, "Decode pipeline started");
        Ok(())
    }

    /// Next decoded frame, or `None` once the final frame was delivered
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        match self.state {
            PipelineState::Running => self.state = PipelineState::Draining,
            PipelineState::Draining => {}
            PipelineState::Idle | PipelineState::Terminated => return None,
        }

        let output_rx = self.output_rx.as_mut()?;
        let frame = match output_rx.recv().await {
            Some(frame) => frame,
            None => {
                warn!("Decode worker exited without a final frame");
                AudioFrame::final_empty()
            }
        };

        if frame.is_final {
            self.terminate();
        }
        Some(frame)
    }

    /// Stop the worker and close both queues without waiting
    pub fn terminate(&mut self) {
        if self.state == PipelineState::Terminated {
            return;
        }
        self.state = PipelineState::Terminated;
        self.stop.store(true, Ordering::Release);

        // Dropping the last sender wakes a worker parked on an empty input queue
        if let Some(input) = self.input.take() {
            input.close();
        }
        // A worker parked on a full output queue sees the receiver go away
        self.output_rx.take();
        debug!("Decode pipeline terminated");
    }

    /// Terminate and wait for the worker thread to exit
    pub async fn shutdown(&mut self) -> TtsResult<()> {
        self.terminate();
        if let Some(worker) = self.worker.take() {
            worker
                .await
                .map_err(|e| TtsError::Worker(format!("Task join error: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run_worker(
    mut decoder: Box<dyn StreamDecoder>,
    mut input_rx: mpsc::UnboundedReceiver<DecoderInput>,
    output_tx: mpsc::Sender<AudioFrame>,
    chunk_size: usize,
    stop: Arc<AtomicBool>,
) {
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(input) = input_rx.blocking_recv() {
        if stop.load(Ordering::Acquire) {
            debug!("Decode worker stopped");
            return;
        }

        match input {
            DecoderInput::Chunk(chunk) => match decoder.decode(&chunk) {
                Ok(decoded) => buffer.extend(decoded),
                Err(e) => {
                    error!(error = %e, "Decode failed, ending stream");
                    send_final(buffer, &output_tx, chunk_size);
                    return;
                }
            },
            DecoderInput::EndOfStream => {
                match decoder.finish() {
                    Ok(tail) => buffer.extend(tail),
                    Err(e) => error!(error = %e, "Decoder flush failed"),
                }
                send_final(buffer, &output_tx, chunk_size);
                debug!("Decode worker finished");
                return;
            }
        }

        while buffer.len() >= chunk_size {
            if stop.load(Ordering::Acquire) {
                return;
            }
            let frame: Vec<u8> = buffer.drain(..chunk_size).collect();
            if output_tx.blocking_send(AudioFrame::new(frame, false)).is_err() {
                debug!("Frame consumer went away, stopping decode worker");
                return;
            }
        }
    }
}

/// Emit what is left as frames, the last one flagged final
fn send_final(buffer: Vec<u8>, output_tx: &mpsc::Sender<AudioFrame>, chunk_size: usize) {
    let mut pieces: Vec<&[u8]> = buffer.chunks(chunk_size).collect();
    if pieces.is_empty() {
        pieces.push(&[]);
    }
    let last = pieces.len() - 1;
    for (i, piece) in pieces.into_iter().enumerate() {
        let frame = AudioFrame::new(Bytes::copy_from_slice(piece), i == last);
        if output_tx.blocking_send(frame).is_err() {
            return;
        }
    }
}

async fn run_producer(
    mut source: ByteStream,
    input: InputGate,
    read_timeout: Duration,
    sink: Option<CacheSink>,
) {
    let mut raw = BytesMut::new();
    let mut chunks = 0usize;

    loop {
        match tokio::time::timeout(read_timeout, source.next()).await {
            Ok(Some(Ok(chunk))) => {
                if chunks == 0 {
                    debug!(bytes = chunk.len(), "First audio chunk received");
                }
                chunks += 1;
                raw.extend_from_slice(&chunk);
                input.send(DecoderInput::Chunk(chunk));
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "Backend stream failed, ending stream");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                let e = TtsError::StreamTimeout(read_timeout);
                warn!(error = %e, "Ending stream early");
                break;
            }
        }
    }

    input.send(DecoderInput::EndOfStream);
    input.close();
    debug!(chunks, bytes = raw.len(), "Backend stream closed");

    if let Some(sink) = sink {
        if raw.is_empty() {
            return;
        }
        sink.cache
            .set(&sink.key, CacheValue::Bytes(raw.freeze()))
            .await;
        debug!(key = %sink.key, "Cached streamed response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynthesisSettings;
    use crate::decoder::PcmStreamDecoder;

    fn passthrough() -> Box<dyn StreamDecoder> {
        let settings = SynthesisSettings::linear16(16000).unwrap();
        Box::new(PcmStreamDecoder::new(16000, 1, &settings).unwrap())
    }

    fn source(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<TtsResult<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_frames_have_chunk_size_until_final() {
        let mut pipeline = DecodePipeline::new(passthrough(), PipelineOptions::new(4)).unwrap();
        pipeline
            .start(source(&["abcdef", "ghij"]), None)
            .unwrap();

        let mut frames = Vec::new();
        while let Some(frame) = pipeline.next_frame().await {
            frames.push(frame);
        }

        let joined: Vec<u8> = frames.iter().flat_map(|f| f.data.to_vec()).collect();
        assert_eq!(joined, b"abcdefghij");
        assert!(frames.last().unwrap().is_final);
        assert!(frames[..frames.len() - 1].iter().all(|f| !f.is_final && f.len() == 4));
        assert_eq!(pipeline.state(), PipelineState::Terminated);
    }

    #[test]
    fn test_closed_gate_accepts_nothing() {
        let (gate, mut rx) = InputGate::new();
        let producer = gate.clone();
        assert!(producer.send(DecoderInput::Chunk(Bytes::from_static(b"ab"))));

        gate.close();
        assert!(!producer.is_open());
        assert!(!producer.send(DecoderInput::Chunk(Bytes::from_static(b"cd"))));

        assert_eq!(
            rx.try_recv(),
            Ok(DecoderInput::Chunk(Bytes::from_static(b"ab")))
        );
        assert_eq!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected));
    }

    #[tokio::test]
    async fn test_terminate_closes_input_queue() {
        let mut pipeline = DecodePipeline::new(passthrough(), PipelineOptions::new(2)).unwrap();
        let first: Vec<TtsResult<Bytes>> = vec![Ok(Bytes::from_static(b"abcd"))];
        let stalled = futures::stream::iter(first).chain(futures::stream::pending());
        pipeline.start(Box::pin(stalled), None).unwrap();

        let producer_side = pipeline.input.clone().unwrap();
        assert!(pipeline.next_frame().await.is_some());
        pipeline.shutdown().await.unwrap();

        assert!(!producer_side.is_open());
        assert!(!producer_side.send(DecoderInput::Chunk(Bytes::from_static(b"late"))));
        assert!(!pipeline.worker_status().is_alive());
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let mut pipeline = DecodePipeline::new(passthrough(), PipelineOptions::new(4)).unwrap();
        pipeline.start(source(&["ab"]), None).unwrap();
        assert!(matches!(
            pipeline.start(source(&["cd"]), None),
            Err(TtsError::InvalidState(_))
        ));

        pipeline.shutdown().await.unwrap();
        assert!(matches!(
            pipeline.start(source(&["cd"]), None),
            Err(TtsError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_source_yields_single_final_frame() {
        let mut pipeline = DecodePipeline::new(passthrough(), PipelineOptions::new(4)).unwrap();
        pipeline.start(source(&[]), None).unwrap();

        assert_eq!(pipeline.next_frame().await, Some(AudioFrame::final_empty()));
        assert_eq!(pipeline.next_frame().await, None);
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(DecodePipeline::new(passthrough(), PipelineOptions::new(0)).is_err());
        assert!(
            DecodePipeline::new(passthrough(), PipelineOptions::new(4).with_output_capacity(0))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_next_frame_before_start_is_none() {
        let mut pipeline = DecodePipeline::new(passthrough(), PipelineOptions::new(4)).unwrap();
        assert_eq!(pipeline.next_frame().await, None);
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }
}
