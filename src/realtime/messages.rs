//! Wire protocol types for the realtime session.
//!
//! Events are JSON objects tagged by a `"type"` field. Client events are
//! serialized and sent as WebSocket text frames; server events arrive the
//! same way and are decoded into [`ServerEvent`]. Unknown server event
//! types decode to [`ServerEvent::Unknown`] so a protocol addition on the
//! server side never breaks the read loop.
//!
//! Audio payloads cross the wire as base64-encoded PCM16 inside text
//! frames, never as binary frames.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::{
    DEFAULT_VAD_PREFIX_PADDING_MS, DEFAULT_VAD_SILENCE_DURATION_MS, DEFAULT_VAD_THRESHOLD,
};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent in `session.update`.
///
/// All fields are optional on the wire; absent fields keep their
/// server-side defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities, e.g. `["text", "audio"]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format (pcm16).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format (pcm16).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Transcription settings for input audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection settings. Omitted entirely in manual mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Tools the assistant may call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Input audio transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g. whisper-1).
    pub model: String,
}

/// Server-side voice activity detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    /// Detection type, currently only `server_vad`.
    #[serde(rename = "type")]
    pub detection_type: String,

    /// Activation threshold (0.0 to 1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,

    /// Audio to prepend before detected speech start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,

    /// Silence duration that ends a turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

impl TurnDetection {
    /// Server VAD with the standard thresholds.
    pub fn server_vad() -> Self {
        Self {
            detection_type: "server_vad".to_string(),
            threshold: Some(DEFAULT_VAD_THRESHOLD),
            prefix_padding_ms: Some(DEFAULT_VAD_PREFIX_PADDING_MS),
            silence_duration_ms: Some(DEFAULT_VAD_SILENCE_DURATION_MS),
        }
    }
}

/// Tool (function) definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type, currently only `function`.
    #[serde(rename = "type")]
    pub tool_type: String,

    /// Function name.
    pub name: String,

    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the arguments object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDef {
    /// A function tool with the given name, description and parameter schema.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// An item appended to the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type: `message` or `function_call_output`.
    #[serde(rename = "type")]
    pub item_type: String,

    /// Role for message items: `user`, `assistant` or `system`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Content parts for message items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,

    /// Call id for function output items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    /// Serialized result for function output items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user message with a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart::input_text(text)]),
            call_id: None,
            output: None,
        }
    }

    /// A function call result for the given call id.
    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            role: None,
            content: None,
            call_id: Some(call_id.into()),
            output: Some(output.into()),
        }
    }
}

/// A single content part inside a message item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Part type: `input_text`, `input_audio`, `text` or `audio`.
    #[serde(rename = "type")]
    pub part_type: String,

    /// Text payload for text parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentPart {
    /// An `input_text` part.
    pub fn input_text(text: impl Into<String>) -> Self {
        Self {
            part_type: "input_text".to_string(),
            text: Some(text.into()),
        }
    }
}

// =============================================================================
// Client Events
// =============================================================================

/// Events sent from the client to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration.
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// New session settings.
        session: SessionConfig,
    },

    /// Append base64 PCM16 audio to the input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio payload.
        audio: String,
    },

    /// Commit the input buffer as a user turn.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Discard any uncommitted input audio.
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Append an item to the conversation.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// The item to append.
        item: ConversationItem,
    },

    /// Truncate a previous assistant audio item at a playback position.
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Id of the item to truncate.
        item_id: String,
        /// Index of the audio content part.
        content_index: u32,
        /// Position in milliseconds at which to cut.
        audio_end_ms: u32,
    },

    /// Request a model response.
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Optional per-response overrides.
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel the in-progress response.
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// An `input_audio_buffer.append` event carrying the given PCM16 bytes.
    pub fn audio_append(pcm: &[u8]) -> Self {
        Self::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(pcm),
        }
    }

    /// A `response.create` requesting both text and audio output,
    /// optionally with a tool manifest for this turn only.
    pub fn response_create(tools: Option<Vec<ToolDef>>) -> Self {
        Self::ResponseCreate {
            response: Some(ResponseConfig {
                modalities: Some(vec!["text".to_string(), "audio".to_string()]),
                instructions: None,
                tools,
            }),
        }
    }
}

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseConfig {
    /// Response modalities override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// Instructions override for this response only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Tools available for this response only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
}

// =============================================================================
// Server Events
// =============================================================================

/// Events received from the server.
///
/// Payload fields are optional wherever the read loop does not depend on
/// them, so partial or minimal events still decode.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session established.
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// Session configuration acknowledged.
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// A response began.
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: Option<ResponseInfo>,
    },

    /// An output item was added to the response.
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        #[serde(default)]
        item: Option<ItemInfo>,
        #[serde(default)]
        output_index: Option<u32>,
    },

    /// Incremental audio for the assistant turn.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        /// Base64-encoded PCM16 chunk.
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        content_index: Option<u32>,
    },

    /// Audio for the current item is complete.
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Incremental transcript of the assistant audio.
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta {
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Full transcript of the assistant audio once the item completes.
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone {
        #[serde(default)]
        transcript: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Incremental text for text-modality responses.
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta {
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Incremental function call arguments.
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta {
        delta: String,
        #[serde(default)]
        call_id: Option<String>,
    },

    /// Function call arguments are complete.
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: Option<String>,
    },

    /// The response finished.
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<ResponseInfo>,
    },

    /// Server VAD detected the start of user speech.
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    /// Server VAD detected the end of user speech.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    /// The input buffer was committed as a user turn.
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        item_id: Option<String>,
    },

    /// A conversation item was created.
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        item: Option<ItemInfo>,
    },

    /// Transcription of a user audio turn finished.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Protocol-level error. The session stays open.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorInfo>,
    },

    /// Any event type this client does not recognize.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode the base64 audio payload of a `response.audio.delta`.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

/// Session details from `session.created` / `session.updated`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Response details from `response.created` / `response.done`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Item details embedded in server events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Error details from an `error` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
