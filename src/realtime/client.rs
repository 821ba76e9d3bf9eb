//! Realtime WebSocket client.
//!
//! [`RealtimeClient`] owns the connection: it performs the authenticated
//! handshake, sends the initial session configuration, exposes the
//! outbound operations (text, audio, response control, function results),
//! and runs the single receive loop that decodes server events and hands
//! them to the [`EventRouter`].
//!
//! All operations take `&self` so the receive loop can run concurrently
//! with sends on the same task; the socket halves live behind locks and
//! the receive loop takes the read half for its whole lifetime.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ClientConfig {
//!     api_key: std::env::var("OPENAI_API_KEY")?,
//!     ..Default::default()
//! };
//! let client = RealtimeClient::new(config, Box::new(MyHandler))?;
//! client.connect().await?;
//! client.send_text("Hello!").await?;
//! client.handle_messages().await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::Request;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::audio::convert::{self, AudioFormat};
use crate::audio::playback::PlaybackProgress;

use super::config::{ClientConfig, RealtimeModel, TurnMode, Voice, REALTIME_URL};
use super::error::{ClientError, ClientResult};
use super::messages::{
    ClientEvent, ConversationItem, InputAudioTranscription, ServerEvent, SessionConfig,
    ToolDef, TurnDetection,
};
use super::router::{EventHandler, EventRouter};

// =============================================================================
// Type Aliases
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Response State
// =============================================================================

/// What the server is currently doing, tracked from lifecycle events.
#[derive(Debug, Default)]
struct ResponseState {
    responding: bool,
    response_id: Option<String>,
    item_id: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Duplex client for the realtime voice protocol.
pub struct RealtimeClient {
    config: ClientConfig,
    model: RealtimeModel,
    voice: Voice,
    tools: Vec<ToolDef>,
    sink: Arc<AsyncMutex<Option<WsSink>>>,
    stream: AsyncMutex<Option<WsSource>>,
    router: Mutex<EventRouter>,
    state: Arc<Mutex<ResponseState>>,
    // Call ids seen in function-call events; function results must
    // reference one of these.
    observed_calls: Arc<Mutex<HashSet<String>>>,
    progress: Option<PlaybackProgress>,
}

impl RealtimeClient {
    /// Create a client from configuration and an event handler.
    ///
    /// Fails when no API key is configured. Unknown model or voice names
    /// fall back to the defaults.
    pub fn new(config: ClientConfig, handler: Box<dyn EventHandler>) -> ClientResult<Self> {
        if config.api_key.is_empty() {
            return Err(ClientError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = RealtimeModel::from_str_or_default(&config.model);
        let voice = config
            .voice
            .as_deref()
            .map(Voice::from_str_or_default)
            .unwrap_or_default();

        Ok(Self {
            config,
            model,
            voice,
            tools: Vec::new(),
            sink: Arc::new(AsyncMutex::new(None)),
            stream: AsyncMutex::new(None),
            router: Mutex::new(EventRouter::new(handler)),
            state: Arc::new(Mutex::new(ResponseState::default())),
            observed_calls: Arc::new(Mutex::new(HashSet::new())),
            progress: None,
        })
    }

    /// Advertise these tools in the session configuration sent at connect.
    pub fn register_tools(&mut self, tools: Vec<ToolDef>) {
        self.tools = tools;
    }

    /// Attach playback progress so truncation can report how much of the
    /// assistant's audio was actually heard.
    pub fn set_playback_progress(&mut self, progress: PlaybackProgress) {
        self.progress = Some(progress);
    }

    /// Whether a response is currently being generated.
    pub fn is_responding(&self) -> bool {
        self.state.lock().responding
    }

    /// Turn mode this client was configured with.
    pub fn turn_mode(&self) -> TurnMode {
        self.config.turn_mode
    }

    // =========================================================================
    // Connection Lifecycle
    // =========================================================================

    /// Open the WebSocket and send the initial session configuration.
    pub async fn connect(&self) -> ClientResult<()> {
        let url = self.endpoint()?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(ClientError::InvalidUrl(url.to_string())),
        };

        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Sec-WebSocket-Protocol", "realtime")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .body(())
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        let (sink, stream) = ws_stream.split();

        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        *self.state.lock() = ResponseState::default();
        // Call ids are scoped to the connection that announced them.
        self.observed_calls.lock().clear();
        info!(model = %self.model, mode = %self.config.turn_mode, "Connected to realtime endpoint");

        let session = self.build_session_config();
        self.update_session(session).await
    }

    /// Close the socket if open. Safe to call repeatedly.
    pub async fn close(&self) -> ClientResult<()> {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            if let Err(e) = sink.close().await {
                debug!("error while closing socket: {}", e);
            }
            info!("Connection closed");
        }
        drop(guard);
        *self.stream.lock().await = None;
        Ok(())
    }

    fn endpoint(&self) -> ClientResult<Url> {
        let base = self.config.url.as_deref().unwrap_or(REALTIME_URL);
        let mut url =
            Url::parse(base).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base, e)))?;
        url.query_pairs_mut()
            .append_pair("model", self.model.as_str());
        Ok(url)
    }

    /// Assemble the session configuration for the configured turn mode.
    /// Manual mode omits `turn_detection` entirely.
    fn build_session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.config.instructions.clone(),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: self
                .config
                .transcription_model
                .as_ref()
                .map(|model| InputAudioTranscription {
                    model: model.clone(),
                }),
            turn_detection: match self.config.turn_mode {
                TurnMode::Manual => None,
                TurnMode::ServerVad => Some(TurnDetection::server_vad()),
            },
            tools: Some(self.tools.clone()),
            tool_choice: Some("auto".to_string()),
            temperature: self.config.temperature,
        }
    }

    // =========================================================================
    // Outbound Operations
    // =========================================================================

    /// Replace the session configuration. Does not wait for the ack.
    pub async fn update_session(&self, session: SessionConfig) -> ClientResult<()> {
        self.send_event(&ClientEvent::SessionUpdate { session }).await
    }

    /// Send a user text turn and request a response.
    ///
    /// The item create is always emitted before the response create;
    /// response correlation depends on that order.
    pub async fn send_text(&self, text: &str) -> ClientResult<()> {
        debug!("sending text turn ({} chars)", text.len());
        self.send_event(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await?;
        self.create_response(None).await
    }

    /// Send a complete user audio turn.
    ///
    /// The input is transcoded to wire PCM, appended, committed, and in
    /// manual mode a response is requested. In server-VAD mode the server
    /// decides when to respond. A transcode failure fails only this call.
    pub async fn send_audio(&self, bytes: &[u8], format: AudioFormat) -> ClientResult<()> {
        let pcm = convert::to_protocol(bytes, &format)?;
        debug!("sending audio turn ({} wire bytes)", pcm.len());

        self.send_event(&ClientEvent::audio_append(&pcm)).await?;
        self.send_event(&ClientEvent::InputAudioBufferCommit).await?;
        if self.config.turn_mode == TurnMode::Manual {
            self.create_response(None).await?;
        }
        Ok(())
    }

    /// Append one wire-format chunk without committing. Used by the
    /// continuous streaming path; the caller guarantees the format.
    pub async fn stream_audio(&self, pcm: &[u8]) -> ClientResult<()> {
        self.send_event(&ClientEvent::audio_append(pcm)).await
    }

    /// Request a response, optionally with a tool manifest for this turn.
    pub async fn create_response(&self, tools: Option<Vec<ToolDef>>) -> ClientResult<()> {
        self.send_event(&ClientEvent::response_create(tools)).await
    }

    /// Send a function call result back into the conversation and request
    /// the follow-up response.
    ///
    /// The call id must have been observed in a function-call event on
    /// this connection.
    pub async fn send_function_result(&self, call_id: &str, output: &str) -> ClientResult<()> {
        if !self.observed_calls.lock().contains(call_id) {
            return Err(ClientError::InvalidCallId(call_id.to_string()));
        }

        self.send_event(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_output(call_id, output),
        })
        .await?;
        self.create_response(None).await
    }

    /// Cancel the in-progress response.
    pub async fn cancel_response(&self) -> ClientResult<()> {
        self.send_event(&ClientEvent::ResponseCancel).await
    }

    /// Truncate the in-flight assistant item at the position the listener
    /// actually heard. No-op when no item is in flight.
    pub async fn truncate_response(&self) -> ClientResult<()> {
        let item_id = match self.state.lock().item_id.clone() {
            Some(id) => id,
            None => return Ok(()),
        };
        let audio_end_ms = self
            .progress
            .as_ref()
            .map(|p| p.played_ms() as u32)
            .unwrap_or(0);

        debug!("truncating item {} at {} ms", item_id, audio_end_ms);
        self.send_event(&ClientEvent::ConversationItemTruncate {
            item_id,
            content_index: 0,
            audio_end_ms,
        })
        .await
    }

    /// Cut short the current response: cancel generation, truncate the
    /// item at the heard position, and clear the responding state.
    /// No-op when no response is in progress.
    pub async fn handle_interruption(&self) -> ClientResult<()> {
        let (responding, has_response) = {
            let state = self.state.lock();
            (state.responding, state.response_id.is_some())
        };
        if !responding {
            return Ok(());
        }

        info!("Interrupting in-progress response");
        if has_response {
            self.cancel_response().await?;
        }
        self.truncate_response().await?;

        let mut state = self.state.lock();
        state.responding = false;
        state.response_id = None;
        state.item_id = None;
        Ok(())
    }

    async fn send_event(&self, event: &ClientEvent) -> ClientResult<()> {
        let text = serde_json::to_string(event)?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ClientError::NotConnected)?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::WebSocketError(e.to_string()))
    }

    // =========================================================================
    // Receive Loop
    // =========================================================================

    /// Run the receive loop until the connection ends.
    ///
    /// Returns `Ok(())` on a clean close and `WebSocketError` on a
    /// mid-stream failure; either way the connection is no longer
    /// serviced and the caller must `connect()` again to resume.
    /// Malformed events are logged and skipped, and server `error`
    /// events are surfaced to the handler without ending the loop.
    ///
    /// Only one receive loop may run per connection; a second concurrent
    /// call fails with `AlreadyReceiving`.
    pub async fn handle_messages(&self) -> ClientResult<()> {
        let mut stream = {
            let mut guard = self.stream.lock().await;
            match guard.take() {
                Some(stream) => stream,
                None => {
                    return Err(if self.sink.lock().await.is_some() {
                        ClientError::AlreadyReceiving
                    } else {
                        ClientError::NotConnected
                    });
                }
            }
        };

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let event: ServerEvent = match serde_json::from_str(text.as_str()) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("skipping malformed event: {}", e);
                            continue;
                        }
                    };

                    self.track_state(&event);
                    if matches!(event, ServerEvent::InputAudioBufferSpeechStarted { .. })
                        && self.is_responding()
                    {
                        self.handle_interruption().await?;
                    }
                    self.router.lock().dispatch(&event);
                }
                // The protocol layer queues the pong reply itself.
                Ok(Message::Ping(_)) => debug!("ping"),
                Ok(Message::Close(_)) => {
                    info!("Server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(ClientError::WebSocketError(e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Update responding/item bookkeeping from lifecycle events before
    /// they are dispatched.
    fn track_state(&self, event: &ServerEvent) {
        match event {
            ServerEvent::ResponseCreated { response } => {
                {
                    let mut state = self.state.lock();
                    state.responding = true;
                    state.response_id = response.as_ref().and_then(|r| r.id.clone());
                }
                if let Some(progress) = &self.progress {
                    progress.reset();
                }
            }
            ServerEvent::ResponseOutputItemAdded { item, .. } => {
                if let Some(item) = item {
                    if let Some(id) = &item.id {
                        self.state.lock().item_id = Some(id.clone());
                    }
                    if item.item_type.as_deref() == Some("function_call") {
                        if let Some(call_id) = &item.call_id {
                            self.observed_calls.lock().insert(call_id.clone());
                        }
                    }
                }
            }
            ServerEvent::ResponseFunctionCallArgumentsDone { call_id, .. } => {
                if let Some(call_id) = call_id {
                    self.observed_calls.lock().insert(call_id.clone());
                }
            }
            ServerEvent::ResponseDone { .. } => {
                let mut state = self.state.lock();
                state.responding = false;
                state.response_id = None;
                state.item_id = None;
            }
            _ => {}
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
