//! PCM format conversion.
//!
//! Everything crossing the protocol boundary is 24 kHz mono 16-bit PCM.
//! This module converts arbitrary input audio (raw PCM in various widths
//! and channel counts, or WAV containers) into that format, and provides
//! the sample-level helpers the capture and playback paths share.

use std::io::Cursor;

use crate::audio::error::{AudioError, AudioResult};
use crate::audio::resampler;
use crate::realtime::config::PROTOCOL_SAMPLE_RATE;

// =============================================================================
// Format Descriptors
// =============================================================================

/// Sample encoding of raw PCM input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    /// Unsigned 8-bit, 128 center.
    U8,
    /// Signed 16-bit little-endian.
    I16,
    /// Signed 32-bit little-endian.
    I32,
    /// 32-bit float little-endian, nominal range -1.0 to 1.0.
    F32,
}

impl PcmFormat {
    /// Width of one sample in bytes.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 => 4,
            Self::F32 => 4,
        }
    }
}

/// Shape of raw PCM input audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: PcmFormat,
}

impl PcmSpec {
    /// The fixed wire format: 24 kHz, mono, 16-bit.
    pub fn protocol() -> Self {
        Self {
            sample_rate: PROTOCOL_SAMPLE_RATE,
            channels: 1,
            format: PcmFormat::I16,
        }
    }

    /// Whether audio in this spec can go on the wire unmodified.
    pub fn is_protocol(&self) -> bool {
        *self == Self::protocol()
    }
}

/// Source format of audio handed to `send_audio`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioFormat {
    /// A WAV container; rate/channels/width come from its header.
    Wav,
    /// Headerless PCM described by the given spec.
    Raw(PcmSpec),
}

// =============================================================================
// Sample Conversions
// =============================================================================

/// Convert a float sample to i16 with clamping.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Convert an i16 sample to float in -1.0..1.0.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert an unsigned 16-bit sample (32768 center) to i16.
#[inline]
pub fn u16_to_i16(sample: u16) -> i16 {
    (sample as i32 - 32768) as i16
}

/// Reinterpret raw little-endian bytes as i16 samples.
pub fn bytes_to_samples(bytes: &[u8], format: PcmFormat) -> AudioResult<Vec<i16>> {
    let width = format.bytes_per_sample();
    if bytes.len() % width != 0 {
        return Err(AudioError::UnsupportedFormat(format!(
            "byte length {} is not a multiple of sample width {}",
            bytes.len(),
            width
        )));
    }

    let samples = match format {
        PcmFormat::U8 => bytes.iter().map(|b| ((*b as i16) - 128) << 8).collect(),
        PcmFormat::I16 => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect(),
        PcmFormat::I32 => bytes
            .chunks_exact(4)
            .map(|c| (i32::from_le_bytes([c[0], c[1], c[2], c[3]]) >> 16) as i16)
            .collect(),
        PcmFormat::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32_to_i16(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
    };
    Ok(samples)
}

/// Serialize i16 samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Average interleaved channels down to mono. A ragged trailing frame is
/// dropped.
pub fn downmix(samples: &[i16], channels: u16) -> AudioResult<Vec<i16>> {
    if channels == 0 {
        return Err(AudioError::UnsupportedFormat("zero channels".to_string()));
    }
    if channels == 1 {
        return Ok(samples.to_vec());
    }
    let n = channels as usize;
    Ok(samples
        .chunks_exact(n)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|s| *s as i32).sum();
            (sum / n as i32) as i16
        })
        .collect())
}

// =============================================================================
// WAV Containers
// =============================================================================

/// Decode a WAV container into (sample_rate, channels, i16 samples).
pub fn decode_wav(bytes: &[u8]) -> AudioResult<(u32, u16, Vec<i16>)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .map(|s| s.map(f32_to_i16))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Int, 8) => reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| v << 8))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Int, 24) => reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| (v >> 8) as i16))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Int, 32) => reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| (v >> 16) as i16))
            .collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit WAV",
                format, bits
            )));
        }
    };

    Ok((spec.sample_rate, spec.channels, samples))
}

/// Wrap i16 samples in a WAV container.
pub fn encode_wav(samples: &[i16], channels: u16, sample_rate: u32) -> AudioResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for s in samples {
            writer.write_sample(*s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

// =============================================================================
// Protocol Transcode
// =============================================================================

/// Transcode input audio of any supported shape into wire PCM bytes
/// (24 kHz mono 16-bit little-endian).
pub fn to_protocol(bytes: &[u8], format: &AudioFormat) -> AudioResult<Vec<u8>> {
    match format {
        AudioFormat::Wav => {
            let (rate, channels, samples) = decode_wav(bytes)?;
            samples_to_protocol(&samples, rate, channels)
        }
        AudioFormat::Raw(spec) => {
            if spec.is_protocol() {
                return Ok(bytes.to_vec());
            }
            let samples = bytes_to_samples(bytes, spec.format)?;
            samples_to_protocol(&samples, spec.sample_rate, spec.channels)
        }
    }
}

/// Downmix and resample i16 samples into wire PCM bytes.
pub fn samples_to_protocol(samples: &[i16], sample_rate: u32, channels: u16) -> AudioResult<Vec<u8>> {
    let mono = downmix(samples, channels)?;
    let resampled = resampler::resample(&mono, sample_rate, PROTOCOL_SAMPLE_RATE)?;
    Ok(samples_to_bytes(&resampled))
}

// =============================================================================
// Tests
// =============================================================================
