use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{FRAME_SIZE, OUTPUT_SAMPLE_RATE};
use crate::live::messages::{
    Content, GenerationConfig, PrebuiltVoiceConfig, SetupMessage, SpeechConfig, TranscriptionConfig,
    VoiceConfig,
};
use crate::tools;

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are the voice assistant built into this phone. \
Keep replies short, friendly and spoken-style. You can change the screen brightness, switch the \
flashlight and Wi-Fi on or off, check the battery level, open apps and return to the home screen \
using the provided tools. Always use a tool when the user asks for one of these actions, then \
confirm what you did.";

/// Configuration for a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier sent at session open
    pub model: String,

    /// Persona and capability description
    pub system_instruction: String,

    /// Prebuilt voice name, service default when unset
    pub voice: Option<String>,

    /// Samples per outbound audio frame
    pub frame_size: usize,

    /// Sample rate of inbound speech
    pub output_sample_rate: u32,

    /// Capacity of the internal message queues
    pub queue_capacity: usize,

    /// Limit on opening the link to the service
    pub connect_timeout: Duration,

    /// Limit on waiting for the service to acknowledge setup
    pub setup_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice: None,
            frame_size: FRAME_SIZE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            queue_capacity: 64,
            connect_timeout: Duration::from_secs(10),
            setup_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Build the session-open message: audio responses, tool schema, and
    /// transcription of both directions
    pub fn setup_message(&self) -> SetupMessage {
        SetupMessage {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: self.voice.as_ref().map(|voice| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: Content::text(&self.system_instruction),
            tools: tools::schema::tool_sets(),
            input_audio_transcription: Some(TranscriptionConfig::default()),
            output_audio_transcription: Some(TranscriptionConfig::default()),
        }
    }
}
