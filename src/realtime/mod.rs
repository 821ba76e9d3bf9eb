//! Realtime voice protocol support
//!
//! This module implements the WebSocket side of the duplex voice
//! session:
//! - `client` - Connection lifecycle, outbound operations, receive loop
//! - `config` - Client configuration, models, voices, turn modes
//! - `error` - Client error type
//! - `messages` - Wire event types (serde) for both directions
//! - `router` - Server event dispatch to application callbacks

pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod router;

// Re-export commonly used types for convenient access
pub use client::RealtimeClient;
pub use config::{
    ClientConfig, RealtimeModel, TurnMode, Voice, PROTOCOL_CHANNELS, PROTOCOL_SAMPLE_RATE,
};
pub use error::{ClientError, ClientResult};
pub use messages::{ClientEvent, ServerEvent, SessionConfig, ToolDef};
pub use router::{EventHandler, EventRouter};
