//! Shared helpers for the speech_core integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use speech_core::{
    AudioChunkStream, AudioFrame, BackendAudio, ByteStream, CacheValue, InMemoryStore,
    RemoteStore, SourceFormat, SpeechBackend, StreamDecoder, SynthesisContext, SynthesisSettings,
    TtsError, TtsResult,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// `len` bytes of 16-bit PCM with a recognisable pattern
pub fn pcm_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Chunks released one at a time, `delay` apart
pub fn delayed_stream(chunks: Vec<Bytes>, delay: Duration) -> ByteStream {
    Box::pin(async_stream::stream! {
        for chunk in chunks {
            tokio::time::sleep(delay).await;
            yield Ok::<Bytes, TtsError>(chunk);
        }
    })
}

/// Chunks followed by a connection that never sends or closes
pub fn stalled_stream(chunks: Vec<Bytes>) -> ByteStream {
    let items: Vec<TtsResult<Bytes>> = chunks.into_iter().map(Ok).collect();
    Box::pin(futures::stream::iter(items).chain(futures::stream::pending()))
}

/// Chunks followed by a transport error
pub fn failing_stream(chunks: Vec<Bytes>) -> ByteStream {
    let mut items: Vec<TtsResult<Bytes>> = chunks.into_iter().map(Ok).collect();
    items.push(Err(TtsError::Network("connection reset".to_string())));
    Box::pin(futures::stream::iter(items))
}

pub enum Script {
    Complete(Bytes),
    Streaming { chunks: Vec<Bytes>, delay: Duration },
    Fail { status: u16, message: String },
}

/// Backend that replays a fixed response and counts requests
pub struct ScriptedBackend {
    script: Script,
    format: SourceFormat,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Script, format: SourceFormat) -> Arc<Self> {
        Arc::new(Self {
            script,
            format,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for ScriptedBackend {
    async fn synthesize(
        &self,
        _text: &str,
        _settings: &SynthesisSettings,
        _context: &SynthesisContext,
    ) -> TtsResult<BackendAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Complete(bytes) => Ok(BackendAudio::Complete(bytes.clone())),
            Script::Streaming { chunks, delay } => Ok(BackendAudio::Streaming(delayed_stream(
                chunks.clone(),
                *delay,
            ))),
            Script::Fail { status, message } => Err(TtsError::BackendFailure {
                status: *status,
                message: message.clone(),
            }),
        }
    }

    fn output_format(&self) -> SourceFormat {
        self.format
    }

    fn cache_namespace(&self) -> &str {
        "scripted"
    }
}

/// In-memory remote tier that counts writes
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryStore,
    sets: AtomicUsize,
}

impl CountingStore {
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }
}

#[async_trait]
impl RemoteStore for CountingStore {
    async fn get_with_expiry(&self, key: &str, ttl: Duration) -> TtsResult<Option<CacheValue>> {
        self.inner.get_with_expiry(key, ttl).await
    }

    async fn renew(&self, key: &str, ttl: Duration) -> TtsResult<bool> {
        self.inner.renew(key, ttl).await
    }

    async fn set_with_expiry(&self, key: &str, value: CacheValue, ttl: Duration) -> TtsResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set_with_expiry(key, value, ttl).await
    }
}

/// Emits the running byte sum of everything seen so far, so output depends
/// on state carried across chunks
#[derive(Default)]
pub struct RunningSumDecoder {
    sum: u8,
}

impl StreamDecoder for RunningSumDecoder {
    fn decode(&mut self, chunk: &[u8]) -> TtsResult<Vec<u8>> {
        Ok(chunk
            .iter()
            .map(|&b| {
                self.sum = self.sum.wrapping_add(b);
                self.sum
            })
            .collect())
    }

    fn finish(&mut self) -> TtsResult<Vec<u8>> {
        Ok(vec![self.sum])
    }
}

/// Decodes the first chunk, then fails
#[derive(Default)]
pub struct BrokenDecoder {
    chunks: usize,
}

impl StreamDecoder for BrokenDecoder {
    fn decode(&mut self, chunk: &[u8]) -> TtsResult<Vec<u8>> {
        self.chunks += 1;
        if self.chunks > 1 {
            return Err(TtsError::Decode("corrupt frame".to_string()));
        }
        Ok(chunk.to_vec())
    }

    fn finish(&mut self) -> TtsResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

pub async fn collect_frames(stream: &mut AudioChunkStream) -> Vec<AudioFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = stream.next_frame().await {
        frames.push(frame);
    }
    frames
}

pub fn concat(frames: &[AudioFrame]) -> Vec<u8> {
    frames.iter().flat_map(|f| f.data.to_vec()).collect()
}

/// Poll `check` until it holds or `limit` passes
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
