use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

/// Microphone sample input rate
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Synthesized speech output rate
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Block of captured audio (mono f32 in [-1, 1])
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for capture backends
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Capture sample rate
    pub sample_rate: u32,
    /// Samples per delivered frame
    pub frame_size: usize,
    /// Frames buffered between the device and the encoder
    pub channel_capacity: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            frame_size: 4096,
            channel_capacity: 32,
        }
    }
}

impl AudioBackendConfig {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal input device (`device-audio` feature)
/// - File: replay a WAV file as if it were spoken
/// - Silence: paced zero frames, for headless runs
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. The channel
    /// closing while capture is still wanted means the device was lost.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create(source: &AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "device-audio")]
                {
                    let backend = super::device::MicrophoneBackend::new(config)?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "device-audio"))]
                {
                    let _ = config;
                    anyhow::bail!("Microphone capture requires the `device-audio` feature")
                }
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::open(path, config)?;
                Ok(Box::new(backend))
            }

            AudioSource::Silence => Ok(Box::new(SilenceBackend::new(config))),
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// WAV file replayed in real time
    File(String),
    /// Generated silence
    Silence,
}

impl std::str::FromStr for AudioSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "device" | "microphone" => Ok(Self::Microphone),
            "silence" => Ok(Self::Silence),
            other => match other.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(Self::File(path.to_string())),
                _ => anyhow::bail!("Unknown capture source '{}'", other),
            },
        }
    }
}

/// Emits frames at real-time pace from a sample supplier until stopped
///
/// The supplier returns `None` to end the stream.
pub(crate) struct PacedEmitter {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PacedEmitter {
    pub(crate) fn spawn<F>(config: &AudioBackendConfig, mut next_frame: F) -> (Self, mpsc::Receiver<AudioFrame>)
    where
        F: FnMut() -> Option<Vec<f32>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let sample_rate = config.sample_rate;
        let period = config.frame_duration();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut timestamp_ms = 0u64;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let Some(samples) = next_frame() else { break };
                        let len = samples.len() as u64;
                        let frame = AudioFrame { samples, sample_rate, timestamp_ms };
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                        timestamp_ms += len * 1000 / sample_rate as u64;
                    }
                }
            }
        });

        (
            Self {
                stop_tx: Some(stop_tx),
                task: Some(task),
            },
            rx,
        )
    }

    pub(crate) async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Capture backend producing silent frames
pub struct SilenceBackend {
    config: AudioBackendConfig,
    emitter: Option<PacedEmitter>,
}

impl SilenceBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self { config, emitter: None }
    }
}

#[async_trait::async_trait]
impl AudioBackend for SilenceBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.emitter.is_some() {
            anyhow::bail!("Already capturing");
        }

        let frame_size = self.config.frame_size;
        let (emitter, rx) = PacedEmitter::spawn(&self.config, move || Some(vec![0.0; frame_size]));
        self.emitter = Some(emitter);

        info!("Silence capture started ({}Hz)", self.config.sample_rate);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut emitter) = self.emitter.take() {
            emitter.stop().await;
            info!("Silence capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.emitter.is_some()
    }

    fn name(&self) -> &str {
        "silence"
    }
}

// ============================================================================
// Output side
// ============================================================================

/// Identifier of one scheduled output source
pub type SourceId = u64;

/// Decoded, playable audio
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Audio output device with its own clock
///
/// Implementations report natural end of each source on the `ended` channel
/// they were opened with.
pub trait AudioOutput: Send {
    /// Current output clock position in seconds
    fn current_time(&self) -> f64;

    /// Start `buffer` at output clock time `start_at`
    fn schedule(&mut self, id: SourceId, buffer: PlaybackBuffer, start_at: f64) -> Result<()>;

    /// Stop one source immediately; unknown ids are ignored
    fn stop(&mut self, id: SourceId);

    /// Release the device
    fn close(&mut self);

    fn name(&self) -> &str;
}

/// Output device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Default speaker via cpal
    Speaker,
    /// Software clock with no sound, for headless runs and tests
    Virtual,
}

impl std::str::FromStr for OutputKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "device" | "speaker" => Ok(Self::Speaker),
            "virtual" => Ok(Self::Virtual),
            other => anyhow::bail!("Unknown output kind '{}'", other),
        }
    }
}

/// Acquires the capture and output devices for a session
pub trait AudioDevices: Send + Sync {
    fn capture(&self) -> Result<Box<dyn AudioBackend>>;

    fn output(&self, ended: mpsc::UnboundedSender<SourceId>) -> Result<Box<dyn AudioOutput>>;
}

/// Devices chosen from configuration
#[derive(Debug, Clone)]
pub struct ConfiguredDevices {
    pub source: AudioSource,
    pub output: OutputKind,
    pub backend: AudioBackendConfig,
    pub output_sample_rate: u32,
}

impl AudioDevices for ConfiguredDevices {
    fn capture(&self) -> Result<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(&self.source, self.backend.clone())
    }

    fn output(&self, ended: mpsc::UnboundedSender<SourceId>) -> Result<Box<dyn AudioOutput>> {
        match self.output {
            OutputKind::Speaker => {
                #[cfg(feature = "device-audio")]
                {
                    let output = super::device::SpeakerOutput::open(self.output_sample_rate, ended)?;
                    Ok(Box::new(output))
                }

                #[cfg(not(feature = "device-audio"))]
                {
                    let _ = ended;
                    anyhow::bail!("Speaker output requires the `device-audio` feature")
                }
            }
            OutputKind::Virtual => Ok(Box::new(super::timeline::VirtualOutput::new(ended))),
        }
    }
}
