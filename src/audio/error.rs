//! Error types for the audio capture and playback pipeline.
//!
//! Audio errors stay local to the subsystem that raised them. A failed
//! device open aborts capture or playback only; a failed transcode fails
//! the one send that needed it. Neither touches the protocol connection.

use thiserror::Error;

/// Errors that can occur in the audio pipeline.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No usable input or output device.
    #[error("Audio device not available: {0}")]
    DeviceNotAvailable(String),

    /// The device rejected the requested stream configuration.
    #[error("Unsupported stream config: {0}")]
    ConfigNotSupported(String),

    /// Stream construction failed.
    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    /// Stream could not be started.
    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),

    /// Capture or playback worker thread failed.
    #[error("Audio thread error: {0}")]
    Thread(String),

    /// Input bytes could not be interpreted as audio.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Sample rate conversion failed.
    #[error("Resampling failed: {0}")]
    Resample(String),

    /// WAV container encode or decode failed.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AudioError::DeviceNotAvailable("no default input".to_string());
        assert_eq!(err.to_string(), "Audio device not available: no default input");

        let err = AudioError::Resample("chunk too small".to_string());
        assert_eq!(err.to_string(), "Resampling failed: chunk too small");
    }
}
