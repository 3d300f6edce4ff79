// Gapless playback scheduling for inbound speech
//
// Each decoded chunk starts at max(cursor, clock_now) and advances the cursor
// by its duration, so chunks arriving faster than real time queue back to
// back and late chunks never start in the past. An interruption hard-cuts
// every active source and resets the cursor to 0.

use anyhow::{bail, Context, Result};
use base64::Engine;
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioOutput, PlaybackBuffer, SourceId};

/// Decode a base64 16-bit little-endian PCM payload
pub fn decode_chunk(payload: &str, sample_rate: u32) -> Result<PlaybackBuffer> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("Audio payload is not valid base64")?;

    if bytes.len() % 2 != 0 {
        bail!("Audio payload has odd length {}", bytes.len());
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(PlaybackBuffer { samples, sample_rate })
}

/// Where a chunk landed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

/// Owns the playback cursor and the set of active sources
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    sample_rate: u32,
    next_start_time: f64,
    active: HashSet<SourceId>,
    next_id: SourceId,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32) -> Self {
        info!("Playback scheduler on '{}' output ({}Hz)", output.name(), sample_rate);
        Self {
            output,
            sample_rate,
            next_start_time: 0.0,
            active: HashSet::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Decode and schedule one inbound payload
    ///
    /// A payload that fails to decode is dropped on its own.
    pub fn enqueue(&mut self, payload: &str) -> Option<ScheduledChunk> {
        match decode_chunk(payload, self.sample_rate) {
            Ok(buffer) => self.schedule(buffer),
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {:#}", e);
                None
            }
        }
    }

    /// Schedule a decoded buffer right after the previous one
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> Option<ScheduledChunk> {
        if self.closed {
            debug!("Playback closed, ignoring late chunk");
            return None;
        }
        if buffer.samples.is_empty() {
            return None;
        }

        let start_at = self.next_start_time.max(self.output.current_time());
        let duration = buffer.duration();
        let id = self.next_id;

        if let Err(e) = self.output.schedule(id, buffer, start_at) {
            warn!("Output rejected chunk: {:#}", e);
            return None;
        }

        self.next_id += 1;
        self.active.insert(id);
        self.next_start_time = start_at + duration;

        Some(ScheduledChunk { id, start_at, duration })
    }

    /// A source finished playing on its own
    pub fn source_ended(&mut self, id: SourceId) {
        self.active.remove(&id);
    }

    /// Barge-in: stop everything now and restart the timeline
    ///
    /// Returns how many sources were cut.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.drain() {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;

        if stopped > 0 {
            info!("Playback interrupted, stopped {} source(s)", stopped);
        }
        stopped
    }

    /// Stop all playback and refuse further chunks
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.interrupt();
        self.output.close();
        self.closed = true;
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_sources(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: SourceId) -> bool {
        self.active.contains(&id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

enum PlaybackCommand {
    Chunk(String),
    Interrupt,
}

/// Cloneable handle for feeding the playback actor
#[derive(Clone)]
pub struct PlaybackSender {
    tx: mpsc::Sender<PlaybackCommand>,
}

impl PlaybackSender {
    /// Queue a payload; a no-op after shutdown
    pub async fn enqueue(&self, payload: String) {
        let _ = self.tx.send(PlaybackCommand::Chunk(payload)).await;
    }

    pub async fn interrupt(&self) {
        let _ = self.tx.send(PlaybackCommand::Interrupt).await;
    }
}

/// The running playback actor
pub struct PlaybackTask {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<PlaybackScheduler>,
}

impl PlaybackTask {
    /// Move the scheduler into its own task
    ///
    /// `ended` must be the receiver paired with the output's end channel.
    pub fn spawn(
        mut scheduler: PlaybackScheduler,
        mut ended: mpsc::UnboundedReceiver<SourceId>,
        capacity: usize,
    ) -> (Self, PlaybackSender) {
        let (tx, mut rx) = mpsc::channel(capacity);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    Some(id) = ended.recv() => scheduler.source_ended(id),
                    cmd = rx.recv() => match cmd {
                        Some(PlaybackCommand::Chunk(payload)) => {
                            if let Some(chunk) = scheduler.enqueue(&payload) {
                                debug!(id = chunk.id, start_at = chunk.start_at, duration = chunk.duration, "chunk scheduled");
                            }
                        }
                        Some(PlaybackCommand::Interrupt) => {
                            scheduler.interrupt();
                        }
                        None => break,
                    },
                }
            }

            scheduler.shutdown();
            scheduler
        });

        (
            Self {
                shutdown: Some(shutdown_tx),
                task,
            },
            PlaybackSender { tx },
        )
    }

    /// Stop all sources and end the actor, skipping any queued chunks
    pub async fn shutdown(mut self) -> Option<PlaybackScheduler> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(scheduler) => Some(scheduler),
            Err(e) => {
                warn!("Playback task failed: {}", e);
                None
            }
        }
    }
}
