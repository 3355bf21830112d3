//! The upstream realtime API wire format.
//!
//! Only the events this service actually sends and reacts to are modeled;
//! everything else deserializes into [`ServerEvent::Other`] and is
//! ignored by the relay.

use aula_core::tools::ToolSpec;
use serde::{Deserialize, Serialize};

/// An event sent to the upstream realtime API.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// The session configuration sent once after connecting.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: String,
}

impl SessionConfig {
    pub fn new(instructions: String, voice: String, tools: Vec<ToolSpec>) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions,
            voice,
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection::default(),
            tools,
            tool_choice: "auto".to_string(),
        }
    }
}

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 700,
            create_response: true,
        }
    }
}

/// A conversation item injected into the upstream session.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub call_id: String,
    pub output: String,
}

impl ConversationItem {
    pub fn function_call_output(call_id: String, output: String) -> Self {
        Self {
            kind: "function_call_output".to_string(),
            call_id,
            output,
        }
    }
}

/// An event received from the upstream realtime API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The VAD detected the student speaking, possibly over the tutor.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    /// One chunk of synthesized tutor audio, base64-encoded.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    /// The model finished emitting arguments for one tool call.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "error")]
    Error { error: UpstreamError },
    /// Any event type this service does not react to.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UpstreamError {
    pub message: String,
}
