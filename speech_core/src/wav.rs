use std::io::Cursor;

use crate::codec::pcm16_to_samples;
use crate::error::{TtsError, TtsResult};

#[cfg(test)]
const WAV_HEADER_LEN: usize = 44;

/// Wrap raw mono 16-bit PCM in a self-contained WAV file.
///
/// A dangling odd byte is not a whole sample and is left out.
pub fn encode_as_wav(pcm: &[u8], sample_rate: u32) -> TtsResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| TtsError::Decode(format!("wav write err: {e}"));

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
    for sample in pcm16_to_samples(pcm) {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(cursor.into_inner())
}

/// Decoded contents of a 16-bit WAV file
#[derive(Debug, Clone)]
pub struct WavAudio {
    /// Interleaved samples
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Read a 16-bit integer WAV file from memory
pub fn read_wav(bytes: &[u8]) -> TtsResult<WavAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| TtsError::Decode(format!("wav read err: {e}")))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(TtsError::Decode(format!(
            "Unsupported WAV format: {} bit {:?} (expected 16 bit integer)",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TtsError::Decode(format!("wav sample err: {e}")))?;

    Ok(WavAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels as usize,
    })
}
