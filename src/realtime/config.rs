//! Realtime API configuration types.
//!
//! This module contains configuration for the realtime voice session:
//! - Model selection
//! - Voice selection
//! - Turn detection mode
//! - Client configuration defaults

use serde::{Deserialize, Serialize};

/// Realtime API WebSocket endpoint.
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Sample rate of all audio crossing the protocol boundary.
pub const PROTOCOL_SAMPLE_RATE: u32 = 24000;

/// Channel count of all audio crossing the protocol boundary.
pub const PROTOCOL_CHANNELS: u16 = 1;

/// Default transcription model for input audio.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Server VAD defaults sent in the session configuration.
pub const DEFAULT_VAD_THRESHOLD: f32 = 0.5;
pub const DEFAULT_VAD_PREFIX_PADDING_MS: u32 = 500;
pub const DEFAULT_VAD_SILENCE_DURATION_MS: u32 = 200;

// =============================================================================
// Models
// =============================================================================

/// Supported realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RealtimeModel {
    /// GPT-4o Realtime Preview model
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Realtime Preview 2024-10-01
    #[serde(rename = "gpt-4o-realtime-preview-2024-10-01")]
    Gpt4oRealtimePreview20241001,
    /// GPT-4o Mini Realtime Preview
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
}

impl RealtimeModel {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241001 => "gpt-4o-realtime-preview-2024-10-01",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "gpt-4o-realtime-preview" => Self::Gpt4oRealtimePreview,
            "gpt-4o-realtime-preview-2024-10-01" => Self::Gpt4oRealtimePreview20241001,
            "gpt-4o-mini-realtime-preview" => Self::Gpt4oMiniRealtimePreview,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Available voices for audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    /// Ash voice
    Ash,
    /// Ballad voice
    Ballad,
    /// Coral voice
    Coral,
    /// Echo voice
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
}

impl Voice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::default(),
        }
    }

    /// Get all available voices.
    pub fn all() -> &'static [Voice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Turn Detection Mode
// =============================================================================

/// How conversation turns are delimited.
///
/// Selected once at construction; the send paths and the session
/// configuration both depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Push-to-talk: the operator delimits turns and the client requests
    /// each response explicitly.
    #[default]
    Manual,
    /// Continuous streaming: the server detects speech boundaries and
    /// generates responses on its own.
    ServerVad,
}

impl TurnMode {
    /// Convert to the wire parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::ServerVad => "server_vad",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "manual" => Self::Manual,
            "server_vad" | "vad" => Self::ServerVad,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for TurnMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for a realtime client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key for bearer authentication.
    pub api_key: String,
    /// Model name, parsed leniently (unknown names fall back to default).
    pub model: String,
    /// Voice for audio output.
    pub voice: Option<String>,
    /// System instructions for the assistant.
    pub instructions: Option<String>,
    /// Sampling temperature for response generation.
    pub temperature: Option<f32>,
    /// Turn detection mode.
    pub turn_mode: TurnMode,
    /// Transcription model for input audio (defaults to whisper-1).
    pub transcription_model: Option<String>,
    /// Endpoint override, mainly for tests.
    pub url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            voice: None,
            instructions: Some("You are a helpful assistant".to_string()),
            temperature: Some(0.8),
            turn_mode: TurnMode::Manual,
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            url: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_as_str() {
        assert_eq!(
            RealtimeModel::Gpt4oRealtimePreview.as_str(),
            "gpt-4o-realtime-preview"
        );
        assert_eq!(
            RealtimeModel::Gpt4oMiniRealtimePreview.as_str(),
            "gpt-4o-mini-realtime-preview"
        );
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!(
            RealtimeModel::from_str_or_default("gpt-4o-realtime-preview-2024-10-01"),
            RealtimeModel::Gpt4oRealtimePreview20241001
        );
        assert_eq!(
            RealtimeModel::from_str_or_default("unknown"),
            RealtimeModel::Gpt4oRealtimePreview
        );
    }

    #[test]
    fn test_voice_from_str() {
        assert_eq!(Voice::from_str_or_default("alloy"), Voice::Alloy);
        assert_eq!(Voice::from_str_or_default("SHIMMER"), Voice::Shimmer);
        assert_eq!(Voice::from_str_or_default("unknown"), Voice::Alloy);
    }

    #[test]
    fn test_voice_all() {
        let voices = Voice::all();
        assert_eq!(voices.len(), 8);
        assert!(voices.contains(&Voice::Alloy));
        assert!(voices.contains(&Voice::Verse));
    }

    #[test]
    fn test_turn_mode_from_str() {
        assert_eq!(TurnMode::from_str_or_default("manual"), TurnMode::Manual);
        assert_eq!(TurnMode::from_str_or_default("server_vad"), TurnMode::ServerVad);
        assert_eq!(TurnMode::from_str_or_default("vad"), TurnMode::ServerVad);
        assert_eq!(TurnMode::from_str_or_default("bogus"), TurnMode::Manual);
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.turn_mode, TurnMode::Manual);
        assert_eq!(config.temperature, Some(0.8));
        assert_eq!(
            config.transcription_model.as_deref(),
            Some(DEFAULT_TRANSCRIPTION_MODEL)
        );
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(REALTIME_URL, "wss://api.openai.com/v1/realtime");
        assert_eq!(PROTOCOL_SAMPLE_RATE, 24000);
        assert_eq!(PROTOCOL_CHANNELS, 1);
    }
}
