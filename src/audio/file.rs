use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::info;

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, PacedEmitter};

/// A WAV file decoded to mono f32 samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (format, bits) => bail!("Unsupported WAV sample format {:?}/{} bits", format, bits),
        };

        let samples = downmix(&interleaved, spec.channels);
        let duration_seconds = samples.len() as f64 / spec.sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Average interleaved channels into mono
fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Capture backend that replays a WAV file in real time
///
/// Once the file is exhausted it keeps delivering silence, the way an idle
/// microphone would, until stopped.
pub struct FileBackend {
    file: AudioFile,
    config: AudioBackendConfig,
    emitter: Option<PacedEmitter>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let file = AudioFile::open(path)?;

        if file.sample_rate != config.sample_rate {
            bail!(
                "Expected {}Hz audio, {} is {}Hz",
                config.sample_rate,
                file.path,
                file.sample_rate
            );
        }

        Ok(Self {
            file,
            config,
            emitter: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.emitter.is_some() {
            bail!("Already capturing");
        }

        let frame_size = self.config.frame_size;
        let samples = self.file.samples.clone();
        let mut position = 0usize;

        let (emitter, rx) = PacedEmitter::spawn(&self.config, move || {
            let mut frame = vec![0.0; frame_size];
            if position < samples.len() {
                let end = (position + frame_size).min(samples.len());
                frame[..end - position].copy_from_slice(&samples[position..end]);
                position = end;
            }
            Some(frame)
        });
        self.emitter = Some(emitter);

        info!("Replaying {} as microphone input", self.file.path);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut emitter) = self.emitter.take() {
            emitter.stop().await;
            info!("File capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.emitter.is_some()
    }

    fn name(&self) -> &str {
        "file"
    }
}
