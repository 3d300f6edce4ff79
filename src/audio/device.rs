//! Microphone and speaker I/O through cpal
//!
//! cpal streams are `!Send` on some hosts, so each stream lives on its own OS
//! thread and the async side only holds channels and shared state. Devices
//! run at whatever rate they support; audio is resampled to and from the
//! rates the live service uses.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, AudioOutput, PlaybackBuffer, SourceId};
use super::resample::{resample, StreamResampler};

/// Keeps a stream alive on a dedicated thread until stopped
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    /// Build a stream on a new thread and wait for it to start playing
    ///
    /// Blocks the caller for device start-up. Returns the device sample rate
    /// reported by `build`.
    fn spawn<F>(name: &str, build: F) -> Result<(Self, u32)>
    where
        F: FnOnce() -> Result<(Stream, u32)> + Send + 'static,
    {
        let (init_tx, init_rx) = std_mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok((stream, rate)) => {
                    let _ = init_tx.send(Ok(rate));
                    // Blocks until stop() or the handle is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                }
            })
            .context("Failed to spawn audio thread")?;

        let rate = init_rx
            .recv()
            .map_err(|_| anyhow!("Audio thread exited during startup"))??;

        Ok((
            Self {
                stop_tx,
                thread: Some(thread),
            },
            rate,
        ))
    }

    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Pick an f32 stream config, at `preferred` Hz when the device allows it
///
/// Otherwise a common device rate is used and the caller resamples.
fn stream_config(
    configs: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
    preferred: u32,
) -> Option<StreamConfig> {
    let candidates: Vec<_> = configs
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let at_rate = |rate: u32| {
        let rate = SampleRate(rate);
        let fits: Vec<_> = candidates
            .iter()
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .collect();

        // Prefer mono
        fits.iter()
            .find(|c| c.channels() == 1)
            .or_else(|| fits.first())
            .map(|c| (*c).clone().with_sample_rate(rate).config())
    };

    [preferred, 48_000, 44_100]
        .into_iter()
        .find_map(at_rate)
        .or_else(|| candidates.first().map(|c| c.clone().with_max_sample_rate().config()))
}

/// Default input device
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stream: Option<StreamThread>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("no input device available"))?;

        info!(
            "Microphone backend initialized: {} ({}Hz)",
            device.name().unwrap_or_default(),
            config.sample_rate
        );

        Ok(Self { config, stream: None })
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.stream.is_some() {
            anyhow::bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let sample_rate = self.config.sample_rate;

        let start = move || {
            StreamThread::spawn("loqa-capture", move || {
                let device = cpal::default_host()
                    .default_input_device()
                    .ok_or_else(|| anyhow!("no input device available"))?;
                let config = stream_config(device.supported_input_configs()?, sample_rate)
                    .ok_or_else(|| anyhow!("no f32 input config available"))?;
                let channels = config.channels as usize;
                let device_rate = config.sample_rate.0;
                let mut resampler = StreamResampler::new(device_rate, sample_rate)?;

                debug!(
                    device = %device.name().unwrap_or_default(),
                    device_rate,
                    channels,
                    "audio capture initialized"
                );

                // Taken on stream error so the encoder sees the capture end
                let sender = Arc::new(Mutex::new(Some(tx)));
                let error_sender = Arc::clone(&sender);
                let mut captured = 0u64;

                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono: Vec<f32> = if channels > 1 {
                            data.chunks_exact(channels)
                                .map(|f| f.iter().sum::<f32>() / channels as f32)
                                .collect()
                        } else {
                            data.to_vec()
                        };
                        let samples = match resampler.process(&mono) {
                            Ok(samples) if samples.is_empty() => return,
                            Ok(samples) => samples,
                            Err(e) => {
                                error!("Capture resampling failed: {:#}", e);
                                return;
                            }
                        };
                        let timestamp_ms = captured * 1000 / sample_rate as u64;
                        captured += samples.len() as u64;

                        let guard = sender.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Some(tx) = guard.as_ref() {
                            let _ = tx.try_send(AudioFrame {
                                samples,
                                sample_rate,
                                timestamp_ms,
                            });
                        }
                    },
                    move |err| {
                        error!("Audio capture error: {}", err);
                        error_sender.lock().unwrap_or_else(PoisonError::into_inner).take();
                    },
                    None,
                )?;
                stream.play()?;
                Ok((stream, device_rate))
            })
        };

        // Device start-up blocks; keep it off the async workers
        let (stream, device_rate) = tokio::task::spawn_blocking(start)
            .await
            .context("Audio start-up task failed")??;

        if device_rate != sample_rate {
            info!("Resampling microphone from {}Hz to {}Hz", device_rate, sample_rate);
        }
        self.stream = Some(stream);
        info!("Microphone capture started");
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

/// Timeline mixed by the output callback
struct Mixer {
    frames_rendered: u64,
    voices: Vec<Voice>,
    ended: mpsc::UnboundedSender<SourceId>,
}

impl Mixer {
    fn render(&mut self, data: &mut [f32], channels: usize) {
        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let t = self.frames_rendered + i as u64;
            let value: f32 = self
                .voices
                .iter()
                .filter(|v| t >= v.start_frame)
                .filter_map(|v| v.samples.get((t - v.start_frame) as usize))
                .sum();
            frame.fill(value.clamp(-1.0, 1.0));
        }
        self.frames_rendered += (data.len() / channels) as u64;

        let now = self.frames_rendered;
        let ended = &self.ended;
        self.voices.retain(|v| {
            let done = v.start_frame + v.samples.len() as u64 <= now;
            if done {
                let _ = ended.send(v.id);
            }
            !done
        });
    }
}

/// Default output device
pub struct SpeakerOutput {
    /// Rate the device runs at; the clock counts frames at this rate
    device_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<StreamThread>,
}

impl SpeakerOutput {
    pub fn open(sample_rate: u32, ended: mpsc::UnboundedSender<SourceId>) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer {
            frames_rendered: 0,
            voices: Vec::new(),
            ended,
        }));
        let render_mixer = Arc::clone(&mixer);

        let (stream, device_rate) = StreamThread::spawn("loqa-playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| anyhow!("no output device available"))?;
            let config = stream_config(device.supported_output_configs()?, sample_rate)
                .ok_or_else(|| anyhow!("no f32 output config available"))?;
            let channels = config.channels as usize;
            let device_rate = config.sample_rate.0;

            debug!(
                device = %device.name().unwrap_or_default(),
                device_rate,
                channels,
                "audio playback initialized"
            );

            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_mixer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .render(data, channels);
                },
                |err| error!("Audio playback error: {}", err),
                None,
            )?;
            stream.play()?;
            Ok((stream, device_rate))
        })?;

        if device_rate != sample_rate {
            info!("Resampling playback from {}Hz to {}Hz", sample_rate, device_rate);
        }

        Ok(Self {
            device_rate,
            mixer,
            stream: Some(stream),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioOutput for SpeakerOutput {
    fn current_time(&self) -> f64 {
        self.lock().frames_rendered as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, id: SourceId, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        if self.stream.is_none() {
            anyhow::bail!("Output closed");
        }
        let samples = resample(&buffer.samples, buffer.sample_rate, self.device_rate)?;
        let start_frame = (start_at * self.device_rate as f64).round() as u64;
        self.lock().voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.lock().voices.retain(|v| v.id != id);
    }

    fn close(&mut self) {
        self.lock().voices.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }

    fn name(&self) -> &str {
        "speaker"
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.close();
    }
}
