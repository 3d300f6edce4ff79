use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::ServerMessage;
use super::transport::OutboundSender;
use crate::audio::PlaybackSender;
use crate::session::{ConversationLog, TranscriptAssembler};
use crate::tools::ToolDispatcher;

/// Fans inbound service messages out to the session components
///
/// Single owner of the transcript buffers; tool batches run inline so that a
/// batch finishes before the next message is looked at.
pub struct MessageRouter {
    transcript: TranscriptAssembler,
    dispatcher: Arc<ToolDispatcher>,
    playback: PlaybackSender,
    outbound: OutboundSender,
    log: ConversationLog,
}

impl MessageRouter {
    pub fn new(
        dispatcher: Arc<ToolDispatcher>,
        playback: PlaybackSender,
        outbound: OutboundSender,
        log: ConversationLog,
    ) -> Self {
        Self {
            transcript: TranscriptAssembler::new(),
            dispatcher,
            playback,
            outbound,
            log,
        }
    }

    /// Process every component of one message in fixed order
    pub async fn route(&mut self, msg: ServerMessage) {
        if let Some(content) = &msg.server_content {
            if let Some(text) = content.input_transcription.as_ref().and_then(|t| t.text.as_deref()) {
                self.transcript.push_input(text);
            }

            if let Some(text) = content.output_transcription.as_ref().and_then(|t| t.text.as_deref()) {
                self.transcript.push_output(text);
            }

            if content.turn_complete {
                for entry in self.transcript.complete_turn() {
                    self.log.push(entry);
                }
            }
        }

        for payload in msg.audio_payloads() {
            self.playback.enqueue(payload.to_string()).await;
        }

        if msg.server_content.as_ref().is_some_and(|c| c.interrupted) {
            debug!("Server signalled interruption");
            self.playback.interrupt().await;
        }

        if let Some(batch) = &msg.tool_call {
            let responses = self
                .dispatcher
                .dispatch_batch(&batch.function_calls, &self.log)
                .await;

            if let Err(e) = self.outbound.send_tool_response(responses).await {
                warn!("Could not send tool responses: {:#}", e);
            }
        }

        if let Some(go_away) = &msg.go_away {
            let left = go_away.time_left.as_deref().unwrap_or("unknown");
            self.log
                .system(format!("Server is ending the session (time left: {left})"));
        }
    }

    /// Route messages until the transport stops delivering
    pub async fn run(mut self, mut messages: mpsc::Receiver<ServerMessage>) {
        info!("Message router started");

        while let Some(msg) = messages.recv().await {
            self.route(msg).await;
        }

        info!("Message router stopped");
    }
}
