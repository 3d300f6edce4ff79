use super::config::SessionConfig;
use super::log::ConversationLog;
use super::stats::{ConnectionState, SessionStatus};
use crate::audio::{
    AudioBackend, AudioCaptureEncoder, AudioDevices, AudioOutput, PlaybackScheduler, PlaybackTask,
    VolumeMeter,
};
use crate::device::DeviceStateView;
use crate::error::SessionError;
use crate::live::{LiveConnector, MessageRouter, SessionTransport, TransportEvent};
use crate::tools::ToolDispatcher;
use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// A voice session with the live service: connect/disconnect lifecycle and
/// the wiring between capture, transport, routing and playback
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct LiveSession {
    inner: Arc<Inner>,
}

struct Inner {
    /// Session configuration
    config: SessionConfig,

    devices: Arc<dyn AudioDevices>,

    connector: Arc<dyn LiveConnector>,

    /// Sole writer of the device state; outlives individual sessions
    dispatcher: Arc<ToolDispatcher>,

    log: ConversationLog,

    volume: VolumeMeter,

    status: watch::Sender<SessionStatus>,

    /// Resources of the running session, if any
    active: Mutex<Option<ActiveSession>>,

    /// Connect attempt in flight; taken by whichever of connect and
    /// disconnect gets to it first
    attempt: StdMutex<Option<Attempt>>,
}

struct Attempt {
    id: Uuid,
    /// Dropped to cancel the attempt
    _cancel: oneshot::Sender<()>,
}

/// Everything a running session owns
struct ActiveSession {
    id: Uuid,
    capture: Box<dyn AudioBackend>,
    transport: SessionTransport,
    playback: PlaybackTask,
    encoder: AbortHandle,
    router: JoinHandle<()>,
    supervisor: Option<JoinHandle<()>>,
}

impl ActiveSession {
    /// Stop capture, transport and playback unconditionally
    async fn teardown(mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }

        self.encoder.abort();
        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop {} capture: {:#}", self.capture.name(), e);
        }

        self.router.abort();
        self.transport.close();
        self.playback.shutdown().await;

        info!(session = %self.id, "Session resources released");
    }
}

/// How a running session ended
enum Ended {
    Failed(SessionError),
    Closed(Option<String>),
}

impl LiveSession {
    pub fn new(
        config: SessionConfig,
        devices: Arc<dyn AudioDevices>,
        connector: Arc<dyn LiveConnector>,
        dispatcher: Arc<ToolDispatcher>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());

        Self {
            inner: Arc::new(Inner {
                config,
                devices,
                connector,
                dispatcher,
                log: ConversationLog::new(),
                volume: VolumeMeter::new(),
                status,
                active: Mutex::new(None),
                attempt: StdMutex::new(None),
            }),
        }
    }

    /// Acquire devices, open the transport and start streaming
    ///
    /// Valid from `Disconnected` or `Error`; a no-op while a session is
    /// connecting or connected. Acquisition and open failures leave the
    /// session in `Error` and are returned. An attempt cancelled by
    /// [`disconnect`](Self::disconnect) returns `Ok`.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let inner = &self.inner;

        let (id, mut cancelled) = {
            let mut active = inner.active.lock().await;

            if matches!(self.state(), ConnectionState::Connecting | ConnectionState::Connected) {
                warn!("Connect requested while {}", self.state());
                return Ok(());
            }
            if let Some(stale) = active.take() {
                stale.teardown().await;
            }

            let id = Uuid::new_v4();
            let (cancel, cancelled) = oneshot::channel();
            *inner.attempt() = Some(Attempt { id, _cancel: cancel });
            inner.transition(
                ConnectionState::Connecting,
                Some(id),
                None,
                format!("Connecting to {}...", inner.config.model),
            );
            (id, cancelled)
        };
        let span = info_span!("session", %id);

        let mut capture = match inner.devices.capture() {
            Ok(capture) => capture,
            Err(e) => return Err(inner.fail_attempt(id, SessionError::Microphone(format!("{e:#}"))).await),
        };
        let frames = match capture.start().await {
            Ok(frames) => frames,
            Err(e) => return Err(inner.fail_attempt(id, SessionError::Microphone(format!("{e:#}"))).await),
        };

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let mut output = match inner.devices.output(ended_tx) {
            Ok(output) => output,
            Err(e) => {
                stop_capture(capture.as_mut()).await;
                return Err(inner.fail_attempt(id, SessionError::Output(format!("{e:#}"))).await);
            }
        };

        let capacity = inner.config.queue_capacity;
        let connect_timeout = inner.config.connect_timeout;
        let open = tokio::time::timeout(
            connect_timeout,
            SessionTransport::open(
                inner.connector.as_ref(),
                inner.config.setup_message(),
                capacity,
                inner.config.setup_timeout,
            ),
        );
        let opened = tokio::select! {
            biased;
            _ = &mut cancelled => None,
            result = open => Some(result),
        };

        let outcome = match opened {
            Some(Ok(Ok(opened))) => Ok(opened),
            Some(Ok(Err(e))) => Err(Some(SessionError::Transport(format!("{e:#}")))),
            Some(Err(_)) => Err(Some(SessionError::Transport(format!(
                "no link after {connect_timeout:?}"
            )))),
            None => Err(None),
        };
        let (transport, streams) = match outcome {
            Ok(opened) => opened,
            Err(error) => {
                release(capture.as_mut(), output.as_mut()).await;
                return match error {
                    Some(error) => Err(inner.fail_attempt(id, error).await),
                    None => {
                        info!(session = %id, "Connect cancelled");
                        Ok(())
                    }
                };
            }
        };

        let mut active = inner.active.lock().await;
        if !inner.claim(id) {
            // Disconnected while the link was opening
            drop(active);
            transport.close();
            release(capture.as_mut(), output.as_mut()).await;
            info!(session = %id, "Connect cancelled");
            return Ok(());
        }

        let scheduler = PlaybackScheduler::new(output, inner.config.output_sample_rate);
        let (playback, playback_tx) = PlaybackTask::spawn(scheduler, ended_rx, capacity);

        let outbound = transport.sender();
        let router = MessageRouter::new(
            Arc::clone(&inner.dispatcher),
            playback_tx,
            outbound.clone(),
            inner.log.clone(),
        );
        let router = tokio::spawn(router.run(streams.messages).instrument(span.clone()));

        let encoder = AudioCaptureEncoder::new(frames, outbound, inner.volume.clone(), inner.config.frame_size);
        let encoder = tokio::spawn(encoder.run().instrument(span.clone()));
        let encoder_abort = encoder.abort_handle();

        let supervisor = tokio::spawn(
            supervise(Arc::clone(inner), id, streams.events, encoder).instrument(span),
        );

        *active = Some(ActiveSession {
            id,
            capture,
            transport,
            playback,
            encoder: encoder_abort,
            router,
            supervisor: Some(supervisor),
        });

        Ok(())
    }

    /// Tear everything down and return to `Disconnected`
    ///
    /// Safe to call in any state; a no-op when already disconnected. A
    /// connect still opening its link is cancelled.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.attempt().take();
        let mut active = inner.active.lock().await;

        let session = active.take();
        if session.is_none() && self.state() == ConnectionState::Disconnected {
            return;
        }

        if let Some(session) = session {
            session.teardown().await;
        }

        inner.volume.reset();
        inner.transition(ConnectionState::Disconnected, None, None, "Session disconnected".into());
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Message for the last failure, if the session is in `Error`
    pub fn error_message(&self) -> Option<String> {
        self.inner.status.borrow().error.clone()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.inner.log
    }

    /// Live microphone level in [0, 1]
    pub fn volume(&self) -> f32 {
        self.inner.volume.get()
    }

    pub fn device_state(&self) -> DeviceStateView {
        self.inner.dispatcher.device_state()
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.inner.dispatcher
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl Inner {
    fn attempt(&self) -> std::sync::MutexGuard<'_, Option<Attempt>> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take ownership of attempt `id` unless disconnect already cancelled it
    fn claim(&self, id: Uuid) -> bool {
        let mut attempt = self.attempt();
        match attempt.as_ref() {
            Some(current) if current.id == id => {
                attempt.take();
                true
            }
            _ => false,
        }
    }

    /// Enter `Error` for a failed attempt that was not cancelled meanwhile
    async fn fail_attempt(&self, id: Uuid, error: SessionError) -> SessionError {
        let _active = self.active.lock().await;
        if self.claim(id) {
            self.fail(id, error)
        } else {
            error
        }
    }

    /// Publish a new status and record the transition in the log
    fn transition(
        &self,
        state: ConnectionState,
        session_id: Option<Uuid>,
        error: Option<String>,
        message: String,
    ) {
        self.status.send_modify(|status| {
            status.state = state;
            if session_id.is_some() {
                status.session_id = session_id;
            }
            status.error = error;
            status.since = Utc::now();
        });
        self.log.system(message);
    }

    /// Enter `Error` with a user-visible message
    fn fail(&self, id: Uuid, error: SessionError) -> SessionError {
        self.volume.reset();
        self.transition(
            ConnectionState::Error,
            Some(id),
            Some(error.to_string()),
            format!("Error: {error}"),
        );
        error
    }

    /// Mark the link established if `id` is still the one connecting
    fn mark_ready(&self, id: Uuid) {
        let current = self.status.borrow().clone();
        if current.state != ConnectionState::Connecting || current.session_id != Some(id) {
            return;
        }
        self.transition(ConnectionState::Connected, Some(id), None, "Link established".into());
    }

    /// Tear down after the transport or capture ended on its own
    async fn finish(&self, id: Uuid, ended: Ended) {
        let mut active = self.active.lock().await;

        let mut session = match active.take() {
            Some(session) if session.id == id => session,
            other => {
                // Already torn down by disconnect or replaced
                *active = other;
                return;
            }
        };

        // This runs on the supervisor; detach instead of aborting ourselves
        session.supervisor.take();
        session.teardown().await;
        self.volume.reset();

        match ended {
            Ended::Failed(error) => {
                self.fail(id, error);
            }
            Ended::Closed(reason) => {
                let message = match reason {
                    Some(reason) => format!("Link terminated: {reason}"),
                    None => "Link terminated".to_string(),
                };
                self.transition(ConnectionState::Disconnected, None, None, message);
            }
        }
    }
}

async fn stop_capture(capture: &mut dyn AudioBackend) {
    if let Err(e) = capture.stop().await {
        warn!("Failed to stop {} capture: {:#}", capture.name(), e);
    }
}

/// Give back devices acquired by an attempt that did not start
async fn release(capture: &mut dyn AudioBackend, output: &mut dyn AudioOutput) {
    stop_capture(capture).await;
    output.close();
}

/// Watch transport and capture for the end of the session
async fn supervise(
    inner: Arc<Inner>,
    id: Uuid,
    mut events: mpsc::Receiver<TransportEvent>,
    mut encoder: JoinHandle<anyhow::Result<()>>,
) {
    let mut encoder_done = false;

    let ended = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Ready) => inner.mark_ready(id),
                Some(TransportEvent::Error(reason)) => break Ended::Failed(SessionError::Transport(reason)),
                Some(TransportEvent::Closed(reason)) => break Ended::Closed(reason),
                None => break Ended::Closed(None),
            },
            result = &mut encoder, if !encoder_done => {
                encoder_done = true;
                if let Ok(Err(e)) = result {
                    break Ended::Failed(SessionError::CaptureLost(format!("{e:#}")));
                }
            }
        }
    };

    inner.finish(id, ended).await;
}
