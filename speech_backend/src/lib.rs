//! Generic HTTP speech backend.
//!
//! POSTs a small JSON body to a synthesis endpoint and hands the response
//! body to `speech_core`, either whole or as it streams in. Knows nothing
//! about any particular provider beyond that shape.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, error};

use speech_core::{
    BackendAudio, SourceFormat, SpeechBackend, SynthesisContext, SynthesisSettings, TtsError,
    TtsResult,
};

/// Connection settings for [`HttpSpeechBackend`]
#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub voice: String,
    pub streaming: bool,
    pub format: SourceFormat,
    pub timeout_secs: u64,
}

impl HttpBackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            api_key_header: "x-api-key".to_string(),
            voice: "default".to_string(),
            streaming: true,
            format: SourceFormat::Pcm16 {
                sample_rate: 16000,
                channels: 1,
            },
            timeout_secs: 30,
        }
    }

    pub fn from_env() -> Result<Self> {
        let url = std::env::var("SPEECH_BACKEND_URL").context("SPEECH_BACKEND_URL must be set")?;
        let mut config = Self::new(url);

        config.api_key = std::env::var("SPEECH_BACKEND_API_KEY")
            .ok()
            .filter(|key| !key.is_empty());

        if let Ok(voice) = std::env::var("SPEECH_BACKEND_VOICE") {
            config.voice = voice;
        }

        if let Ok(streaming) = std::env::var("SPEECH_BACKEND_STREAMING") {
            config.streaming = matches!(
                streaming.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }

        if let Ok(format) = std::env::var("SPEECH_BACKEND_FORMAT") {
            config.format = format
                .parse()
                .with_context(|| format!("Invalid SPEECH_BACKEND_FORMAT: {format}"))?;
        }

        config.timeout_secs = std::env::var("SPEECH_BACKEND_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.timeout_secs);

        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
    sampling_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    sentiment: Option<&'a str>,
}

pub struct HttpSpeechBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
    namespace: String,
}

impl HttpSpeechBackend {
    pub fn new(config: HttpBackendConfig) -> TtsResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| TtsError::Network(format!("http client err: {e}")))?;
        let namespace = format!("{}|{}|{}", config.url, config.voice, config.format);
        Ok(Self {
            client,
            config,
            namespace,
        })
    }

    pub fn from_env() -> Result<Self> {
        let config = HttpBackendConfig::from_env()?;
        Ok(Self::new(config)?)
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }
}

#[async_trait]
impl SpeechBackend for HttpSpeechBackend {
    async fn synthesize(
        &self,
        text: &str,
        settings: &SynthesisSettings,
        context: &SynthesisContext,
    ) -> TtsResult<BackendAudio> {
        let body = SynthesisRequest {
            text,
            voice: &self.config.voice,
            sampling_rate: settings.sampling_rate(),
            sentiment: context.sentiment.as_deref(),
        };

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header(self.config.api_key_header.as_str(), key.as_str());
        }
        // A streamed body may legitimately take longer than the timeout
        if !self.config.streaming {
            request = request.timeout(self.config.timeout());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TtsError::Network(format!("request err: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %message, "Speech backend request failed");
            return Err(TtsError::BackendFailure {
                status: status.as_u16(),
                message,
            });
        }

        if self.config.streaming {
            debug!(url = %self.config.url, "Streaming speech backend response");
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| TtsError::Network(format!("stream err: {e}"))));
            Ok(BackendAudio::Streaming(Box::pin(stream)))
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TtsError::Network(format!("body read err: {e}")))?;
            debug!(bytes = bytes.len(), "Received complete speech backend response");
            Ok(BackendAudio::Complete(bytes))
        }
    }

    fn output_format(&self) -> SourceFormat {
        self.config.format
    }

    fn cache_namespace(&self) -> &str {
        &self.namespace
    }
}
