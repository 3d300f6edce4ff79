// Software output device
//
// Keeps an output clock from the tokio timer and reports each source as ended
// once its scheduled span has elapsed. Nothing is rendered.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::backend::{AudioOutput, PlaybackBuffer, SourceId};

pub struct VirtualOutput {
    origin: Instant,
    ended: mpsc::UnboundedSender<SourceId>,
    sources: HashMap<SourceId, JoinHandle<()>>,
    closed: bool,
}

impl VirtualOutput {
    pub fn new(ended: mpsc::UnboundedSender<SourceId>) -> Self {
        Self {
            origin: Instant::now(),
            ended,
            sources: HashMap::new(),
            closed: false,
        }
    }
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, id: SourceId, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        if self.closed {
            bail!("Output closed");
        }

        self.sources.retain(|_, task| !task.is_finished());

        let end = self.origin + Duration::from_secs_f64(start_at.max(0.0) + buffer.duration());
        let ended = self.ended.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(end).await;
            let _ = ended.send(id);
        });

        debug!(id, start_at, duration = buffer.duration(), "virtual source scheduled");
        self.sources.insert(id, task);
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        if let Some(task) = self.sources.remove(&id) {
            task.abort();
        }
    }

    fn close(&mut self) {
        for (_, task) in self.sources.drain() {
            task.abort();
        }
        self.closed = true;
    }

    fn name(&self) -> &str {
        "virtual"
    }
}

impl Drop for VirtualOutput {
    fn drop(&mut self) {
        self.close();
    }
}
