// Shared fakes for the integration tests
//
// FakeConnector hands out in-memory links and gives the test the service end
// of each one. TestDevices captures from a channel the test controls and
// plays into the virtual output. ManualOutput records what it was asked to do.

#![allow(dead_code)]

use anyhow::{bail, Result};
use loqa_live::audio::{
    AudioBackend, AudioDevices, AudioFrame, AudioOutput, PlaybackBuffer, SourceId, VirtualOutput,
};
use loqa_live::live::{ClientMessage, LinkEvent, LiveConnector, LiveLink, ServerMessage};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// The service side of one in-memory link
pub struct ServiceEnd {
    pub from_client: mpsc::Receiver<ClientMessage>,
    pub to_client: mpsc::Sender<LinkEvent>,
}

impl ServiceEnd {
    pub async fn send(&self, msg: Value) {
        let msg: ServerMessage = serde_json::from_value(msg).unwrap();
        self.to_client.send(LinkEvent::Message(msg)).await.unwrap();
    }

    pub async fn setup_complete(&self) {
        self.send(serde_json::json!({ "setupComplete": {} })).await;
    }

    /// Next message from the client, skipping realtime audio
    pub async fn next_non_audio(&mut self) -> ClientMessage {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
                .await
                .expect("timed out waiting for client message")
                .expect("client link closed");
            if !matches!(msg, ClientMessage::RealtimeInput(_)) {
                return msg;
            }
        }
    }
}

pub struct FakeConnector {
    accept: bool,
    attempts: AtomicUsize,
    ends: mpsc::UnboundedSender<ServiceEnd>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServiceEnd>) {
        Self::build(true)
    }

    /// Connector whose every attempt fails
    pub fn refusing() -> Arc<Self> {
        Self::build(false).0
    }

    fn build(accept: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ServiceEnd>) {
        let (ends, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept,
            attempts: AtomicUsize::new(0),
            ends,
        };
        (Arc::new(connector), rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self) -> Result<LiveLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            bail!("connection refused");
        }

        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let _ = self.ends.send(ServiceEnd {
            from_client: out_rx,
            to_client: in_tx,
        });

        Ok(LiveLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Connector whose attempts never complete, like a stalled handshake
#[derive(Default)]
pub struct HangingConnector {
    attempts: AtomicUsize,
}

impl HangingConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LiveConnector for HangingConnector {
    async fn connect(&self) -> Result<LiveLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Capture backend fed from a test-held channel
pub struct ChannelCapture {
    frames: Option<mpsc::Receiver<AudioFrame>>,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioBackend for ChannelCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        match self.frames.take() {
            Some(frames) => {
                self.capturing = true;
                Ok(frames)
            }
            None => bail!("Already capturing"),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "channel"
    }
}

pub struct TestDevices {
    microphone: bool,
    speaker: bool,
    capture_tx: Mutex<Option<mpsc::Sender<AudioFrame>>>,
}

impl TestDevices {
    pub fn available() -> Arc<Self> {
        Self::build(true, true)
    }

    pub fn without_microphone() -> Arc<Self> {
        Self::build(false, true)
    }

    pub fn without_speaker() -> Arc<Self> {
        Self::build(true, false)
    }

    fn build(microphone: bool, speaker: bool) -> Arc<Self> {
        Arc::new(Self {
            microphone,
            speaker,
            capture_tx: Mutex::new(None),
        })
    }

    /// Feed side of the most recently acquired capture
    pub fn microphone_feed(&self) -> Option<mpsc::Sender<AudioFrame>> {
        self.capture_tx.lock().unwrap().clone()
    }

    /// Drop the feed so the capture stream ends
    pub fn unplug_microphone(&self) {
        self.capture_tx.lock().unwrap().take();
    }
}

impl AudioDevices for TestDevices {
    fn capture(&self) -> Result<Box<dyn AudioBackend>> {
        if !self.microphone {
            bail!("Permission denied");
        }
        let (tx, rx) = mpsc::channel(16);
        *self.capture_tx.lock().unwrap() = Some(tx);
        Ok(Box::new(ChannelCapture {
            frames: Some(rx),
            capturing: false,
        }))
    }

    fn output(&self, ended: mpsc::UnboundedSender<SourceId>) -> Result<Box<dyn AudioOutput>> {
        if !self.speaker {
            bail!("No output device");
        }
        Ok(Box::new(VirtualOutput::new(ended)))
    }
}

/// Poll `check` until it holds or a few seconds pass
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Everything a ManualOutput was asked to do
#[derive(Default)]
pub struct OutputLog {
    pub now: f64,
    pub scheduled: Vec<(SourceId, f64, usize)>,
    pub stopped: Vec<SourceId>,
    pub closed: bool,
}

/// Output whose clock only moves when the test says so
#[derive(Clone, Default)]
pub struct ManualOutput(Arc<Mutex<OutputLog>>);

impl ManualOutput {
    pub fn set_time(&self, now: f64) {
        self.0.lock().unwrap().now = now;
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, OutputLog> {
        self.0.lock().unwrap()
    }
}

impl AudioOutput for ManualOutput {
    fn current_time(&self) -> f64 {
        self.0.lock().unwrap().now
    }

    fn schedule(&mut self, id: SourceId, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .scheduled
            .push((id, start_at, buffer.samples.len()));
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.0.lock().unwrap().stopped.push(id);
    }

    fn close(&mut self) {
        self.0.lock().unwrap().closed = true;
    }

    fn name(&self) -> &str {
        "manual"
    }
}
