//! Sample-rate conversion between device rates and the live service's rates

use anyhow::{anyhow, Result};
use rubato::{FftFixedIn, Resampler as _};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

fn new_resampler(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f32>> {
    FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
        .map_err(|e| anyhow!("Resampler init failed ({from_rate}Hz -> {to_rate}Hz): {e}"))
}

/// Converts a continuous mono stream that arrives in arbitrary blocks
///
/// Input is held until a full resampler chunk is available, so output lags
/// input by at most one chunk.
pub struct StreamResampler {
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = if from_rate == to_rate {
            None
        } else {
            Some(new_resampler(from_rate, to_rate)?)
        };

        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Feed a block, returning all output completed so far
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);
        let mut output = Vec::new();

        while self.pending.len() >= resampler.input_frames_next() {
            let chunk: Vec<f32> = self.pending.drain(..resampler.input_frames_next()).collect();
            let result = resampler
                .process(&[chunk], None)
                .map_err(|e| anyhow!("Resample failed: {e}"))?;
            if let Some(channel) = result.into_iter().next() {
                output.extend(channel);
            }
        }

        Ok(output)
    }
}

/// Convert a complete mono clip
///
/// The result is trimmed of resampler delay so it covers the same span of
/// time as the input.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = new_resampler(from_rate, to_rate)?;
    let expected = (samples.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(delay + expected + CHUNK_SIZE);
    let mut pos = 0;

    // Past the end of the clip the resampler is fed silence to flush it
    while output.len() < delay + expected {
        let needed = resampler.input_frames_next();
        let mut chunk = vec![0.0f32; needed];
        if pos < samples.len() {
            let end = (pos + needed).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += needed;

        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| anyhow!("Resample failed: {e}"))?;
        if let Some(channel) = result.into_iter().next() {
            output.extend(channel);
        }
    }

    Ok(output.drain(delay..delay + expected).collect())
}
