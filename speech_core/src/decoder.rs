//! Incremental decoders from backend output to playback-ready bytes.
//!
//! Decoders are stateful and fed chunk by chunk in arrival order. Each one
//! ends in a [`PcmFormatter`] that down-mixes, resamples and encodes to the
//! requested [`SynthesisSettings`].

use std::fmt;
use std::str::FromStr;

use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::{debug, warn};

use crate::codec::{downmix_to_mono, encode_samples, pcm16_to_samples};
use crate::config::{AudioEncoding, SynthesisSettings};
use crate::error::{TtsError, TtsResult};

/// Stateful chunk decoder producing bytes in the target encoding
pub trait StreamDecoder: Send + 'static {
    /// Decode the next chunk; may return nothing until enough input arrived
    fn decode(&mut self, chunk: &[u8]) -> TtsResult<Vec<u8>>;

    /// Flush buffered state at end of stream
    fn finish(&mut self) -> TtsResult<Vec<u8>>;
}

/// Audio format a backend produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Interleaved little-endian 16-bit PCM
    Pcm16 { sample_rate: u32, channels: u16 },
    /// MPEG audio Layer III bitstream
    Mp3,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Pcm16 {
                sample_rate,
                channels,
            } => write!(f, "pcm16:{sample_rate}:{channels}"),
            SourceFormat::Mp3 => write!(f, "mp3"),
        }
    }
}

impl FromStr for SourceFormat {
    type Err = TtsError;

    /// `mp3`, `pcm16:<rate>` or `pcm16:<rate>:<channels>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let mut parts = lower.split(':');
        let invalid = || TtsError::InvalidSettings(format!("Unknown source format: {s}"));

        match parts.next() {
            Some("mp3") if parts.next().is_none() => Ok(SourceFormat::Mp3),
            Some("pcm16") | Some("pcm") => {
                let sample_rate = parts
                    .next()
                    .and_then(|v| v.parse::<u32>().ok())
                    .filter(|&rate| rate > 0)
                    .ok_or_else(invalid)?;
                let channels = match parts.next() {
                    Some(v) => v.parse::<u16>().ok().filter(|&c| c > 0).ok_or_else(invalid)?,
                    None => 1,
                };
                Ok(SourceFormat::Pcm16 {
                    sample_rate,
                    channels,
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// Decoder for a backend's output format
pub fn make_decoder(
    format: SourceFormat,
    settings: &SynthesisSettings,
) -> TtsResult<Box<dyn StreamDecoder>> {
    Ok(match format {
        SourceFormat::Pcm16 {
            sample_rate,
            channels,
        } => Box::new(PcmStreamDecoder::new(sample_rate, channels as usize, settings)?),
        SourceFormat::Mp3 => Box::new(Mp3StreamDecoder::new(settings)),
    })
}

/// Run a complete buffer through a decoder
pub fn decode_all(decoder: &mut dyn StreamDecoder, bytes: &[u8]) -> TtsResult<Vec<u8>> {
    let mut out = decoder.decode(bytes)?;
    out.extend(decoder.finish()?);
    Ok(out)
}

const RESAMPLER_CHUNK: usize = 1024;
const RESAMPLER_SUB_CHUNKS: usize = 2;

/// Chunked FFT resampler for a continuous mono stream
struct StreamResampler {
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
    delay_remaining: usize,
    ratio: f64,
    frames_in: usize,
    frames_out: usize,
}

impl StreamResampler {
    fn new(rate_in: u32, rate_out: u32) -> TtsResult<Self> {
        let resampler = FftFixedIn::<f32>::new(
            rate_in as usize,
            rate_out as usize,
            RESAMPLER_CHUNK,
            RESAMPLER_SUB_CHUNKS,
            1,
        )
        .map_err(|e| TtsError::InvalidSettings(format!("resampler init err: {e}")))?;
        let delay_remaining = resampler.output_delay();

        Ok(Self {
            resampler,
            pending: Vec::new(),
            delay_remaining,
            ratio: rate_out as f64 / rate_in as f64,
            frames_in: 0,
            frames_out: 0,
        })
    }

    fn push(&mut self, samples: &[i16]) -> TtsResult<Vec<i16>> {
        self.frames_in += samples.len();
        self.pending
            .extend(samples.iter().map(|&s| s as f32 / 32768.0));

        let mut out = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block = vec![self.pending.drain(..needed).collect::<Vec<f32>>()];
            let resampled = self
                .resampler
                .process(&block, None)
                .map_err(|e| TtsError::Decode(format!("resample err: {e}")))?;
            self.emit(&resampled[0], &mut out);
        }
        Ok(out)
    }

    fn finish(&mut self) -> TtsResult<Vec<i16>> {
        let expected = (self.frames_in as f64 * self.ratio).round() as usize;
        let mut out = Vec::new();

        if !self.pending.is_empty() {
            let block = vec![std::mem::take(&mut self.pending)];
            let resampled = self
                .resampler
                .process_partial(Some(block.as_slice()), None)
                .map_err(|e| TtsError::Decode(format!("resample err: {e}")))?;
            self.emit(&resampled[0], &mut out);
        }

        // Push silence through until the delayed tail has come out
        let mut flushes = 0;
        while self.frames_out < expected && flushes < 8 {
            let resampled = self
                .resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| TtsError::Decode(format!("resample err: {e}")))?;
            self.emit(&resampled[0], &mut out);
            flushes += 1;
        }

        if self.frames_out > expected {
            let excess = self.frames_out - expected;
            out.truncate(out.len().saturating_sub(excess));
            self.frames_out = expected;
        }
        Ok(out)
    }

    fn emit(&mut self, samples: &[f32], out: &mut Vec<i16>) {
        let skip = self.delay_remaining.min(samples.len());
        self.delay_remaining -= skip;
        for &s in &samples[skip..] {
            out.push((s * 32767.0).round().clamp(-32768.0, 32767.0) as i16);
        }
        self.frames_out += samples.len() - skip;
    }
}

/// Converts decoded interleaved samples to the target settings
pub struct PcmFormatter {
    channels: usize,
    encoding: AudioEncoding,
    resampler: Option<StreamResampler>,
}

impl PcmFormatter {
    pub fn new(source_rate: u32, channels: usize, settings: &SynthesisSettings) -> TtsResult<Self> {
        if source_rate == 0 || channels == 0 {
            return Err(TtsError::InvalidSettings(format!(
                "Invalid source audio: {source_rate} Hz, {channels} channel(s)"
            )));
        }
        let resampler = if source_rate != settings.sampling_rate() {
            debug!(
                from = source_rate,
                to = settings.sampling_rate(),
                "Resampling backend audio"
            );
            Some(StreamResampler::new(source_rate, settings.sampling_rate())?)
        } else {
            None
        };

        Ok(Self {
            channels,
            encoding: settings.audio_encoding(),
            resampler,
        })
    }

    pub fn format(&mut self, interleaved: &[i16]) -> TtsResult<Vec<u8>> {
        let mono = downmix_to_mono(interleaved, self.channels);
        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.push(&mono)?,
            None => mono,
        };
        Ok(encode_samples(&samples, self.encoding))
    }

    pub fn finish(&mut self) -> TtsResult<Vec<u8>> {
        match self.resampler.as_mut() {
            Some(resampler) => Ok(encode_samples(&resampler.finish()?, self.encoding)),
            None => Ok(Vec::new()),
        }
    }
}

/// Decoder for raw 16-bit PCM arriving in arbitrary byte chunks
pub struct PcmStreamDecoder {
    formatter: PcmFormatter,
    carry: Vec<u8>,
    frame_bytes: usize,
}

impl PcmStreamDecoder {
    pub fn new(sample_rate: u32, channels: usize, settings: &SynthesisSettings) -> TtsResult<Self> {
        Ok(Self {
            formatter: PcmFormatter::new(sample_rate, channels, settings)?,
            carry: Vec::new(),
            frame_bytes: 2 * channels,
        })
    }
}

impl StreamDecoder for PcmStreamDecoder {
    fn decode(&mut self, chunk: &[u8]) -> TtsResult<Vec<u8>> {
        self.carry.extend_from_slice(chunk);
        // Only whole multi-channel frames; the rest waits for the next chunk
        let usable = self.carry.len() / self.frame_bytes * self.frame_bytes;
        let samples = pcm16_to_samples(&self.carry[..usable]);
        self.carry.drain(..usable);
        self.formatter.format(&samples)
    }

    fn finish(&mut self) -> TtsResult<Vec<u8>> {
        if !self.carry.is_empty() {
            debug!(bytes = self.carry.len(), "Dropping incomplete trailing PCM frame");
            self.carry.clear();
        }
        self.formatter.finish()
    }
}

/// Parsed MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    sample_rate: u32,
    channels: usize,
    frame_len: usize,
}

const MPEG1_BITRATES: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const MPEG2_BITRATES: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Parse a Layer III frame header; `None` if the bytes are not one
fn parse_frame_header(bytes: &[u8]) -> Option<FrameHeader> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
        return None;
    }

    let version = (bytes[1] >> 3) & 0b11;
    let layer = (bytes[1] >> 1) & 0b11;
    let bitrate_index = (bytes[2] >> 4) as usize;
    let rate_index = ((bytes[2] >> 2) & 0b11) as usize;
    let padding = ((bytes[2] >> 1) & 1) as u32;
    let mono = bytes[3] >> 6 == 0b11;

    // Layer III only; free-format and reserved values are rejected
    if layer != 0b01 || version == 0b01 || bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
        return None;
    }

    let (sample_rate, bitrate, coefficient) = match version {
        0b11 => ([44100, 48000, 32000][rate_index], MPEG1_BITRATES[bitrate_index], 144),
        0b10 => ([22050, 24000, 16000][rate_index], MPEG2_BITRATES[bitrate_index], 72),
        _ => ([11025, 12000, 8000][rate_index], MPEG2_BITRATES[bitrate_index], 72),
    };

    Some(FrameHeader {
        sample_rate,
        channels: if mono { 1 } else { 2 },
        frame_len: (coefficient * bitrate * 1000 / sample_rate + padding) as usize,
    })
}

/// Size of an ID3v2 tag at the start of `bytes`, once enough is buffered
fn id3v2_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 10 || &bytes[..3] != b"ID3" {
        return None;
    }
    let size = bytes[6..10]
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | (b & 0x7F) as usize);
    let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
    Some(10 + size + footer)
}

/// Incremental MP3 decoder.
///
/// Splits the byte stream into frames and hands each one to a single
/// symphonia decoder instance, so the bit reservoir carries across network
/// chunk boundaries.
pub struct Mp3StreamDecoder {
    settings: SynthesisSettings,
    buffer: Vec<u8>,
    skip_remaining: usize,
    codec: Option<Box<dyn Decoder>>,
    formatter: Option<PcmFormatter>,
    timestamp: u64,
}

impl Mp3StreamDecoder {
    pub fn new(settings: &SynthesisSettings) -> Self {
        Self {
            settings: *settings,
            buffer: Vec::new(),
            skip_remaining: 0,
            codec: None,
            formatter: None,
            timestamp: 0,
        }
    }

    fn decode_frame(&mut self, header: FrameHeader, frame: &[u8]) -> TtsResult<Vec<u8>> {
        if self.codec.is_none() {
            let mut params = CodecParameters::new();
            params
                .for_codec(CODEC_TYPE_MP3)
                .with_sample_rate(header.sample_rate);
            let codec = symphonia::default::get_codecs()
                .make(&params, &DecoderOptions::default())
                .map_err(|e| TtsError::Decode(format!("mp3 decoder init err: {e}")))?;
            self.codec = Some(codec);
        }
        let Some(codec) = self.codec.as_mut() else {
            return Ok(Vec::new());
        };

        let packet = Packet::new_from_slice(0, self.timestamp, 0, frame);
        self.timestamp += 1;

        let decoded = match codec.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "Skipping undecodable mp3 frame");
                return Ok(Vec::new());
            }
            Err(SymphoniaError::ResetRequired) => {
                warn!("mp3 decoder requested a reset, skipping frame");
                return Ok(Vec::new());
            }
            Err(e) => return Err(TtsError::Decode(format!("mp3 decode err: {e}"))),
        };

        let spec = *decoded.spec();
        let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);

        if self.formatter.is_none() {
            let channels = match spec.channels.count() {
                0 => header.channels,
                n => n,
            };
            self.formatter = Some(PcmFormatter::new(spec.rate, channels, &self.settings)?);
        }
        match self.formatter.as_mut() {
            Some(formatter) => formatter.format(samples.samples()),
            None => Ok(Vec::new()),
        }
    }
}

impl StreamDecoder for Mp3StreamDecoder {
    fn decode(&mut self, chunk: &[u8]) -> TtsResult<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        let mut pos = 0;

        loop {
            if self.skip_remaining > 0 {
                let skip = self.skip_remaining.min(self.buffer.len() - pos);
                pos += skip;
                self.skip_remaining -= skip;
                if self.skip_remaining > 0 {
                    break;
                }
            }

            let rest = &self.buffer[pos..];
            if rest.starts_with(b"ID3") {
                match id3v2_len(rest) {
                    Some(len) => {
                        self.skip_remaining = len;
                        continue;
                    }
                    None => break,
                }
            }
            if rest.len() < 4 {
                break;
            }

            let Some(header) = parse_frame_header(rest) else {
                // Resync on the next byte
                pos += 1;
                continue;
            };
            if rest.len() < header.frame_len {
                break;
            }

            let frame = rest[..header.frame_len].to_vec();
            pos += header.frame_len;
            out.extend(self.decode_frame(header, &frame)?);
        }

        self.buffer.drain(..pos);
        Ok(out)
    }

    fn finish(&mut self) -> TtsResult<Vec<u8>> {
        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "Discarding incomplete trailing mp3 data");
            self.buffer.clear();
        }
        match self.formatter.as_mut() {
            Some(formatter) => formatter.finish(),
            None => Ok(Vec::new()),
        }
    }
}
