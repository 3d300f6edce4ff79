use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MIME type of outbound microphone audio
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

// ============================================================================
// Client -> server
// ============================================================================

/// Message sent to the live service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session open configuration, sent once right after connecting
    Setup(SetupMessage),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Realtime audio send for one encoded PCM frame
    pub fn audio(pcm: &[u8]) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: INPUT_AUDIO_MIME.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(pcm),
            }],
        })
    }

    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse { function_responses })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolSet>,
    /// Presence enables streaming of input transcriptions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    /// Presence enables streaming of output transcriptions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// One tool in the schema advertised at session open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// Parameter shape (`type`, `properties`, `required`)
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Inline binary payload, base64-encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Result of one tool call, paired with the request by id and name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// ============================================================================
// Server -> client
// ============================================================================

/// Message received from the live service
///
/// Every part is optional and several can arrive together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Open acknowledgment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallBatch>,

    /// Server is about to end the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Base64 audio payloads carried in the model turn, in part order
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/"))
            .filter(|blob| !blob.data.is_empty())
            .map(|blob| blob.data.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,

    #[serde(default)]
    pub turn_complete: bool,

    /// Barge-in: the user started speaking over playback
    #[serde(default)]
    pub interrupted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}
