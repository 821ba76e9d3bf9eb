//! Turn coordination.
//!
//! [`TurnCoordinator`] ties the protocol client, the audio services, and
//! the tool registry together behind a single command channel. One
//! cooperative task drives both the socket receive loop and command
//! processing, so shells (a terminal loop, a UI thread, the capture
//! worker) only ever submit [`Command`] values and never touch the
//! protocol directly.
//!
//! In manual mode turns follow a small state machine: idle until the
//! user starts recording, then the captured turn is committed and a
//! response awaited. In server-VAD mode the microphone streams
//! continuously and the server decides turn boundaries, so the state
//! machine stays idle.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::audio::capture::AudioCaptureService;
use crate::audio::convert::AudioFormat;
use crate::audio::playback::AudioPlaybackService;
use crate::realtime::client::RealtimeClient;
use crate::realtime::config::TurnMode;
use crate::realtime::error::{ClientError, ClientResult};
use crate::tools::ToolRegistry;

// =============================================================================
// Commands
// =============================================================================

/// Work submitted to the coordinator from shells and callbacks.
#[derive(Debug, Clone)]
pub enum Command {
    /// Start capturing a manual-mode turn.
    BeginRecording,
    /// Finish the current capture and send it as a turn.
    EndRecording,
    /// Send a text turn.
    SendText(String),
    /// One wire-format chunk from the continuous capture worker.
    StreamFrame(Bytes),
    /// Execute a tool call requested by the model.
    FunctionCall {
        name: String,
        call_id: String,
        arguments: String,
    },
    /// The server finished generating the current response.
    ResponseFinished,
    /// Cut the current response short and flush playback.
    Interrupt,
    /// Shut the session down.
    Quit,
}

/// Manual-mode turn progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Idle,
    Recording,
    Committing,
    AwaitingResponse,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Owns the session: client, capture, playback, tools, and the command
/// channel that feeds them.
pub struct TurnCoordinator {
    client: RealtimeClient,
    commands: UnboundedReceiver<Command>,
    driver: Driver,
}

impl TurnCoordinator {
    /// Build a coordinator around an already-connected client. The
    /// channel pair comes from the caller so event handlers and input
    /// threads can hold the sender before the session starts.
    pub fn new(
        client: RealtimeClient,
        capture: AudioCaptureService,
        playback: Arc<Mutex<AudioPlaybackService>>,
        tools: ToolRegistry,
        handle: UnboundedSender<Command>,
        commands: UnboundedReceiver<Command>,
    ) -> Self {
        let mode = client.turn_mode();
        Self {
            client,
            commands,
            driver: Driver {
                capture,
                playback,
                tools,
                handle,
                mode,
                state: TurnState::Idle,
            },
        }
    }

    /// Channel used to submit commands; clone freely across threads.
    pub fn command_handle(&self) -> UnboundedSender<Command> {
        self.driver.handle.clone()
    }

    /// Drive the session until the connection ends, `Quit` arrives, or an
    /// operation fails. Always shuts the subsystems down before returning.
    pub async fn run(self) -> ClientResult<()> {
        let client = self.client;
        let mut commands = self.commands;
        let mut driver = self.driver;

        if driver.mode == TurnMode::ServerVad {
            driver.begin_streaming();
        }

        let receive = client.handle_messages();
        tokio::pin!(receive);

        let result = loop {
            tokio::select! {
                result = &mut receive => {
                    if result.is_ok() {
                        info!("Receive loop ended");
                    }
                    break result;
                }
                cmd = commands.recv() => match cmd {
                    Some(Command::Quit) | None => break Ok(()),
                    Some(cmd) => {
                        if let Err(e) = driver.process(&client, cmd).await {
                            break Err(e);
                        }
                    }
                },
            }
        };

        driver.shutdown(&client).await;
        result
    }
}

// =============================================================================
// Command Processing
// =============================================================================

/// The command-processing half of the coordinator, split from the client
/// so both can be borrowed while the receive loop is in flight.
struct Driver {
    capture: AudioCaptureService,
    playback: Arc<Mutex<AudioPlaybackService>>,
    tools: ToolRegistry,
    handle: UnboundedSender<Command>,
    mode: TurnMode,
    state: TurnState,
}

impl Driver {
    async fn process(&mut self, client: &RealtimeClient, cmd: Command) -> ClientResult<()> {
        match cmd {
            Command::BeginRecording => {
                self.begin_recording();
                Ok(())
            }
            Command::EndRecording => self.end_recording(client).await,
            Command::SendText(text) => self.send_text(client, &text).await,
            Command::StreamFrame(pcm) => self.stream_frame(client, &pcm).await,
            Command::FunctionCall {
                name,
                call_id,
                arguments,
            } => self.run_function(client, &name, &call_id, &arguments).await,
            Command::ResponseFinished => {
                if self.mode == TurnMode::Manual {
                    self.state = TurnState::Idle;
                }
                Ok(())
            }
            Command::Interrupt => self.interrupt(client).await,
            // Quit never reaches here; the run loop intercepts it.
            Command::Quit => Ok(()),
        }
    }

    /// Start the continuous capture worker. A missing microphone keeps
    /// the session alive as text-only.
    fn begin_streaming(&mut self) {
        match self.capture.start_streaming(self.handle.clone()) {
            Ok(()) => info!("Streaming microphone audio"),
            Err(e) => error!("microphone streaming unavailable: {}", e),
        }
    }

    fn begin_recording(&mut self) {
        if self.mode != TurnMode::Manual {
            debug!("ignoring begin-recording while streaming continuously");
            return;
        }
        if self.state != TurnState::Idle {
            debug!(state = ?self.state, "ignoring begin-recording");
            return;
        }
        match self.capture.start_recording() {
            Ok(()) => {
                self.state = TurnState::Recording;
                info!("Recording");
            }
            Err(e) => error!("could not start recording: {}", e),
        }
    }

    async fn end_recording(&mut self, client: &RealtimeClient) -> ClientResult<()> {
        if self.state != TurnState::Recording {
            debug!(state = ?self.state, "ignoring end-recording");
            return Ok(());
        }

        self.state = TurnState::Committing;
        let wav = match self.capture.stop_recording() {
            Ok(wav) => wav,
            Err(e) => {
                error!("could not finish recording: {}", e);
                self.state = TurnState::Idle;
                return Ok(());
            }
        };

        match client.send_audio(&wav, AudioFormat::Wav).await {
            Ok(()) => {
                self.state = TurnState::AwaitingResponse;
                info!("Turn committed, awaiting response");
                Ok(())
            }
            // A transcode failure drops this turn but not the session.
            Err(ClientError::Encoding(e)) => {
                error!("audio turn dropped: {}", e);
                self.state = TurnState::Idle;
                Ok(())
            }
            Err(e) => {
                self.state = TurnState::Idle;
                Err(e)
            }
        }
    }

    async fn send_text(&mut self, client: &RealtimeClient, text: &str) -> ClientResult<()> {
        if self.state == TurnState::Recording {
            warn!("ignoring text while recording; end the recording first");
            return Ok(());
        }
        client.send_text(text).await?;
        if self.mode == TurnMode::Manual {
            self.state = TurnState::AwaitingResponse;
        }
        Ok(())
    }

    async fn stream_frame(&mut self, client: &RealtimeClient, pcm: &[u8]) -> ClientResult<()> {
        if self.mode != TurnMode::ServerVad {
            return Ok(());
        }
        client.stream_audio(pcm).await
    }

    /// Run a requested tool and send its output back. Failures become an
    /// error payload so the conversation can continue; a call id the
    /// client never observed is dropped with a warning.
    async fn run_function(
        &mut self,
        client: &RealtimeClient,
        name: &str,
        call_id: &str,
        arguments: &str,
    ) -> ClientResult<()> {
        info!(tool = name, call_id, "executing tool call");
        let output = match self.tools.invoke(name, arguments).await {
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(tool = name, "tool call failed: {}", e);
                serde_json::json!({ "error": e.to_string() }).to_string()
            }
        };

        match client.send_function_result(call_id, &output).await {
            Ok(()) => Ok(()),
            Err(ClientError::InvalidCallId(id)) => {
                warn!("dropping result for unknown call id {}", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn interrupt(&mut self, client: &RealtimeClient) -> ClientResult<()> {
        self.playback.lock().stop_immediately();
        client.handle_interruption().await?;
        if self.mode == TurnMode::Manual && self.state == TurnState::AwaitingResponse {
            self.state = TurnState::Idle;
        }
        Ok(())
    }

    async fn shutdown(&mut self, client: &RealtimeClient) {
        if self.mode == TurnMode::ServerVad {
            if let Err(e) = self.capture.stop_streaming() {
                debug!("capture shutdown: {}", e);
            }
        }
        if self.state == TurnState::Recording {
            if let Err(e) = self.capture.stop_recording() {
                debug!("capture shutdown: {}", e);
            }
        }
        self.playback.lock().cleanup();
        if let Err(e) = client.close().await {
            debug!("close during shutdown: {}", e);
        }
        info!("Session shut down");
    }
}

// =============================================================================
// Tests
// =============================================================================
