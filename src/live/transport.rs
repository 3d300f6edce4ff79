// Duplex session transport
//
// The live link is modelled as a pair of channels so the WebSocket pumps and
// in-memory test links look the same to the session. Outbound messages queue
// behind an explicit handshake and are only released to the link once the
// service acknowledges the setup message.

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::messages::{ClientMessage, FunctionResponse, ServerMessage, SetupMessage};

/// What the link reports upward
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(ServerMessage),
    /// Network or protocol failure
    Error(String),
    /// Remote end closed, with its reason if one was given
    Closed(Option<String>),
}

/// An open duplex link to the live service
pub struct LiveLink {
    /// Dropping this sender asks the link to close
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Opens links to the live service
#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self) -> Result<LiveLink>;
}

/// Live service over a WebSocket carrying JSON messages
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Self {
        let url = match api_key {
            Some(key) => format!("{endpoint}?key={key}"),
            None => endpoint.to_string(),
        };
        Self { url }
    }
}

fn parse_server_message(bytes: &[u8]) -> Option<LinkEvent> {
    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(msg) => Some(LinkEvent::Message(msg)),
        Err(e) => {
            warn!("Ignoring unparseable server message: {}", e);
            None
        }
    }
}

#[async_trait::async_trait]
impl LiveConnector for WebSocketConnector {
    async fn connect(&self) -> Result<LiveLink> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .context("Failed to open live WebSocket")?;

        info!("Live WebSocket connected");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(64);
        let (in_tx, in_rx) = mpsc::channel::<LinkEvent>(64);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode outbound message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => parse_server_message(text.as_bytes()),
                    Ok(Message::Binary(bytes)) => parse_server_message(&bytes),
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|reason| !reason.is_empty());
                        let _ = in_tx.send(LinkEvent::Closed(reason)).await;
                        return;
                    }
                    Ok(_) => None,
                    Err(e) => {
                        let _ = in_tx.send(LinkEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                if let Some(event) = event {
                    if in_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            let _ = in_tx.send(LinkEvent::Closed(None)).await;
        });

        Ok(LiveLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Readiness of the session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    NotReady,
    Ready,
}

/// Lifecycle notifications from the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Setup acknowledged; queued sends are being released
    Ready,
    Error(String),
    Closed(Option<String>),
}

/// Result of a fire-and-forget send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queue full; the message was discarded
    Dropped,
    Closed,
}

/// Cloneable handle to the outbound queue
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<ClientMessage>,
}

impl OutboundSender {
    pub fn new(tx: mpsc::Sender<ClientMessage>) -> Self {
        Self { tx }
    }

    /// Queue a realtime audio frame without waiting
    pub fn send_audio(&self, pcm: &[u8]) -> SendOutcome {
        match self.tx.try_send(ClientMessage::audio(pcm)) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => SendOutcome::Dropped,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Queue a tool-response batch
    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.tx
            .send(ClientMessage::tool_response(responses))
            .await
            .map_err(|_| anyhow!("Live link closed"))
    }
}

/// Receivers handed to the session when the transport opens
pub struct TransportStreams {
    /// Inbound service messages, for the router
    pub messages: mpsc::Receiver<ServerMessage>,
    /// Lifecycle events, for the session supervisor
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Owner of the duplex logical session
pub struct SessionTransport {
    queue: mpsc::Sender<ClientMessage>,
    handshake: watch::Receiver<Handshake>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl SessionTransport {
    /// Connect and send the setup message
    ///
    /// The returned handle accepts sends immediately; they are held until
    /// the service acknowledges the setup. At most `capacity` messages are
    /// held. Without an acknowledgment within `setup_timeout` the transport
    /// reports an error.
    pub async fn open(
        connector: &dyn LiveConnector,
        setup: SetupMessage,
        capacity: usize,
        setup_timeout: Duration,
    ) -> Result<(Self, TransportStreams)> {
        let link = connector.connect().await?;

        link.outbound
            .send(ClientMessage::Setup(setup))
            .await
            .map_err(|_| anyhow!("Live link closed before setup"))?;

        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (handshake_tx, handshake_rx) = watch::channel(Handshake::NotReady);
        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(8);

        let writer = tokio::spawn(run_writer(queue_rx, link.outbound, handshake_rx.clone(), capacity));
        let reader = tokio::spawn(run_reader(
            link.inbound,
            messages_tx,
            handshake_tx,
            events_tx,
            setup_timeout,
        ));

        Ok((
            Self {
                queue: queue_tx,
                handshake: handshake_rx,
                writer,
                reader,
            },
            TransportStreams {
                messages: messages_rx,
                events: events_rx,
            },
        ))
    }

    pub fn sender(&self) -> OutboundSender {
        OutboundSender::new(self.queue.clone())
    }

    pub fn handshake(&self) -> Handshake {
        *self.handshake.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.handshake() == Handshake::Ready
    }

    /// Request close; queued sends that have not gone out are discarded
    pub fn close(self) {
        self.reader.abort();
        self.writer.abort();
        debug!("Session transport closed");
    }
}

async fn run_writer(
    mut queue: mpsc::Receiver<ClientMessage>,
    link: mpsc::Sender<ClientMessage>,
    mut handshake: watch::Receiver<Handshake>,
    pending_limit: usize,
) {
    let mut pending = VecDeque::new();
    let mut dropped = 0usize;
    let mut ready = *handshake.borrow_and_update() == Handshake::Ready;

    loop {
        tokio::select! {
            changed = handshake.changed(), if !ready => {
                if changed.is_err() {
                    break;
                }
                if *handshake.borrow_and_update() == Handshake::Ready {
                    ready = true;
                    debug!("Handshake complete, releasing {} deferred message(s)", pending.len());
                    if dropped > 0 {
                        warn!("Dropped {} message(s) while waiting for the handshake", dropped);
                    }
                    while let Some(msg) = pending.pop_front() {
                        if link.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
            }
            msg = queue.recv() => match msg {
                Some(msg) if ready => {
                    if link.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(msg) if pending.len() < pending_limit => pending.push_back(msg),
                Some(_) => dropped += 1,
                None => break,
            },
        }
    }
}

async fn run_reader(
    mut link: mpsc::Receiver<LinkEvent>,
    messages: mpsc::Sender<ServerMessage>,
    handshake: watch::Sender<Handshake>,
    events: mpsc::Sender<TransportEvent>,
    setup_timeout: Duration,
) {
    let deadline = tokio::time::sleep(setup_timeout);
    tokio::pin!(deadline);
    let mut ready = false;

    loop {
        let event = tokio::select! {
            event = link.recv() => event,
            _ = &mut deadline, if !ready => {
                warn!("No setup acknowledgment after {:?}", setup_timeout);
                let _ = events.send(TransportEvent::Error("setup not acknowledged".into())).await;
                return;
            }
        };
        let Some(event) = event else { break };

        match event {
            LinkEvent::Message(msg) => {
                if msg.is_setup_complete() && !ready {
                    ready = true;
                    handshake.send_replace(Handshake::Ready);
                    let _ = events.send(TransportEvent::Ready).await;
                }
                if messages.send(msg).await.is_err() {
                    return;
                }
            }
            LinkEvent::Error(reason) => {
                let _ = events.send(TransportEvent::Error(reason)).await;
                return;
            }
            LinkEvent::Closed(reason) => {
                let _ = events.send(TransportEvent::Closed(reason)).await;
                return;
            }
        }
    }

    let _ = events.send(TransportEvent::Closed(None)).await;
}
