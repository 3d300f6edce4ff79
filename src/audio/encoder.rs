// Capture-side encoding: volume metering and f32 -> 16-bit PCM
//
// The encoder task re-frames whatever block size the backend delivers into
// fixed frames, meters each frame, and queues it for the live link without
// waiting on the network.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::AudioFrame;
use crate::live::transport::{OutboundSender, SendOutcome};

/// Samples per outbound frame
pub const FRAME_SIZE: usize = 4096;

/// Gain applied to RMS before clamping to 1 (tuned for visual feedback)
const VOLUME_GAIN: f32 = 5.0;

/// Root-mean-square energy of a block; 0 for an empty block
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Normalised volume level in [0, 1]
pub fn volume_level(rms: f32) -> f32 {
    if rms.is_nan() {
        return 0.0;
    }
    (rms * VOLUME_GAIN).clamp(0.0, 1.0)
}

/// Convert one sample to signed 16-bit PCM
///
/// Negative values scale by 32768 and non-negative by 32767 so both ends of
/// the signed range are reachable.
pub fn sample_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode a block as little-endian 16-bit PCM bytes
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| sample_to_pcm16(s).to_le_bytes())
        .collect()
}

/// Cuts an arbitrary sample stream into fixed-size frames
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Add samples, returning every frame completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_size;
        let mut frames = Vec::with_capacity(complete);
        for _ in 0..complete {
            let rest = self.pending.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Samples waiting for a full frame
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Live microphone level shared with presentation
#[derive(Debug, Clone, Default)]
pub struct VolumeMeter(Arc<AtomicU32>);

impl VolumeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Encodes captured frames and hands them to the outbound queue
pub struct AudioCaptureEncoder {
    frames: mpsc::Receiver<AudioFrame>,
    outbound: OutboundSender,
    volume: VolumeMeter,
    accumulator: FrameAccumulator,
}

impl AudioCaptureEncoder {
    pub fn new(
        frames: mpsc::Receiver<AudioFrame>,
        outbound: OutboundSender,
        volume: VolumeMeter,
        frame_size: usize,
    ) -> Self {
        Self {
            frames,
            outbound,
            volume,
            accumulator: FrameAccumulator::new(frame_size),
        }
    }

    /// Run until the capture stream ends or the link goes away
    ///
    /// Returns an error when the capture stream ends on its own, which means
    /// the device stopped delivering audio.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Audio encoder task started");
        let mut sent = 0u64;

        while let Some(frame) = self.frames.recv().await {
            for block in self.accumulator.push(&frame.samples) {
                self.volume.set(volume_level(rms(&block)));

                match self.outbound.send_audio(&encode_pcm16(&block)) {
                    SendOutcome::Queued => sent += 1,
                    SendOutcome::Dropped => warn!("Outbound queue full, dropping audio frame"),
                    SendOutcome::Closed => {
                        debug!("Outbound link closed after {} frames", sent);
                        return Ok(());
                    }
                }
            }
        }

        anyhow::bail!("capture stream ended after {} frames", sent)
    }
}
