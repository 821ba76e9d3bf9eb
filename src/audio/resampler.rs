//! Sample rate conversion on top of rubato's sinc resampler.
//!
//! Capture devices rarely run at the 24 kHz the wire requires, and output
//! devices rarely accept it. [`StreamResampler`] converts between rates in
//! fixed-size chunks and buffers ragged input across calls, so it can sit
//! inside a streaming callback path. [`resample`] is the one-shot variant
//! for whole recordings.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::audio::convert::{f32_to_i16, i16_to_f32};
use crate::audio::error::{AudioError, AudioResult};

/// Input frames consumed per resampler pass.
const RESAMPLER_CHUNK: usize = 512;

/// Streaming mono sample rate converter.
pub struct StreamResampler {
    resampler: SincFixedIn<f32>,
    input_buffer: Vec<f32>,
}

impl StreamResampler {
    /// Create a converter from `input_rate` to `output_rate`.
    pub fn new(input_rate: u32, output_rate: u32) -> AudioResult<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(AudioError::Resample(format!(
                "invalid rates {} -> {}",
                input_rate, output_rate
            )));
        }

        let params = SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 128,
            window: WindowFunction::Blackman2,
        };

        let resampler = SincFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            2.0,
            params,
            RESAMPLER_CHUNK,
            1,
        )
        .map_err(|e| AudioError::Resample(e.to_string()))?;

        Ok(Self {
            resampler,
            input_buffer: Vec::with_capacity(RESAMPLER_CHUNK * 2),
        })
    }

    /// Feed input samples, producing output for every complete chunk.
    /// Leftover input is buffered for the next call.
    pub fn process(&mut self, input: &[f32]) -> AudioResult<Vec<f32>> {
        self.input_buffer.extend_from_slice(input);

        let mut output = Vec::new();
        while self.input_buffer.len() >= RESAMPLER_CHUNK {
            let chunk: Vec<f32> = self.input_buffer.drain(..RESAMPLER_CHUNK).collect();
            let mut result = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::Resample(e.to_string()))?;
            output.append(&mut result[0]);
        }
        Ok(output)
    }

    /// Zero-pad and convert whatever input is still buffered.
    pub fn flush(&mut self) -> AudioResult<Vec<f32>> {
        if self.input_buffer.is_empty() {
            return Ok(Vec::new());
        }
        self.input_buffer.resize(RESAMPLER_CHUNK, 0.0);
        self.process(&[])
    }

    /// Drop buffered input and internal filter state.
    pub fn reset(&mut self) {
        self.input_buffer.clear();
        self.resampler.reset();
    }
}

/// One-shot conversion of a whole i16 recording between rates.
pub fn resample(samples: &[i16], input_rate: u32, output_rate: u32) -> AudioResult<Vec<i16>> {
    if input_rate == output_rate {
        return Ok(samples.to_vec());
    }

    let mut converter = StreamResampler::new(input_rate, output_rate)?;
    let floats: Vec<f32> = samples.iter().map(|s| i16_to_f32(*s)).collect();
    let mut output = converter.process(&floats)?;
    output.extend(converter.flush()?);
    Ok(output.into_iter().map(f32_to_i16).collect())
}
