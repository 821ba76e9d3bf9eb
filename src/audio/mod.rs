//! Audio capture, playback, and format conversion
//!
//! Everything that touches sound devices or PCM lives here:
//! - `capture` - Microphone recording and continuous streaming
//! - `convert` - PCM format conversion, downmixing, WAV codec
//! - `error` - Audio error type
//! - `playback` - Bounded-queue playback with drop-oldest overflow
//! - `resampler` - Streaming sample-rate conversion

pub mod capture;
pub mod convert;
pub mod error;
pub mod playback;
pub mod resampler;

// Re-export commonly used types for convenient access
pub use capture::AudioCaptureService;
pub use convert::AudioFormat;
pub use error::{AudioError, AudioResult};
pub use playback::{AudioChunk, AudioPlaybackService, PlaybackProgress};
pub use resampler::StreamResampler;
