pub mod audio;
pub mod coordinator;
pub mod realtime;
pub mod tools;

// Re-export commonly used items for convenience
pub use audio::{
    AudioCaptureService, AudioError, AudioFormat, AudioPlaybackService, AudioResult,
    PlaybackProgress,
};
pub use coordinator::{Command, TurnCoordinator};
pub use realtime::{
    ClientConfig, ClientError, ClientResult, EventHandler, RealtimeClient, TurnMode, Voice,
};
pub use tools::{Tool, ToolError, ToolRegistry};
