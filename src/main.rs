use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error};

use voicewire::realtime::messages::ErrorInfo;
use voicewire::{
    AudioCaptureService, AudioPlaybackService, ClientConfig, Command, EventHandler,
    RealtimeClient, Tool, ToolError, ToolRegistry, TurnCoordinator, TurnMode,
};

/// Voicewire - Terminal voice chat over a realtime speech API
#[derive(Parser, Debug)]
#[command(name = "voicewire")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Realtime model to use
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Assistant voice (alloy, ash, ballad, coral, echo, sage, shimmer, verse)
    #[arg(long = "voice")]
    voice: Option<String>,

    /// System instructions for the assistant
    #[arg(short = 'i', long = "instructions")]
    instructions: Option<String>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push-to-talk session: press Enter to start and stop recording
    Manual,

    /// Hands-free session: the microphone streams continuously and the
    /// server detects when you start and stop talking
    Stream,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before reading the key)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Parse CLI arguments
    let cli = Cli::parse();
    let turn_mode = match cli.command.unwrap_or(Commands::Manual) {
        Commands::Manual => TurnMode::Manual,
        Commands::Stream => TurnMode::ServerVad,
    };

    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
        anyhow!("OPENAI_API_KEY is not set (put it in the environment or a .env file)")
    })?;

    let mut config = ClientConfig {
        api_key,
        turn_mode,
        ..Default::default()
    };
    if let Some(model) = cli.model {
        config.model = model;
    }
    if cli.voice.is_some() {
        config.voice = cli.voice;
    }
    if cli.instructions.is_some() {
        config.instructions = cli.instructions;
    }

    // Wire the session together: the handler and the stdin thread hold
    // the sending half of the command channel, the coordinator the rest.
    let (handle, commands) = mpsc::unbounded_channel();
    let playback = Arc::new(Mutex::new(AudioPlaybackService::new()));
    let handler = TerminalHandler::new(playback.clone(), handle.clone());

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CurrentTime));

    let mut client = RealtimeClient::new(config, Box::new(handler))?;
    client.register_tools(tools.definitions());
    client.set_playback_progress(playback.lock().progress());
    client.connect().await?;

    print_banner(turn_mode);

    let stdin_handle = handle.clone();
    std::thread::spawn(move || stdin_loop(stdin_handle, turn_mode));

    let capture = AudioCaptureService::new();
    let coordinator = TurnCoordinator::new(client, capture, playback, tools, handle, commands);
    coordinator.run().await?;

    println!("Goodbye.");
    Ok(())
}

fn print_banner(turn_mode: TurnMode) {
    match turn_mode {
        TurnMode::Manual => {
            println!("Connected. Press Enter to start recording, Enter again to send.");
            println!("Type a message to chat, 'i' to interrupt, 'q' to quit.");
        }
        TurnMode::ServerVad => {
            println!("Connected. The microphone is live; just start talking.");
            println!("Type a message to chat, 'i' to interrupt, 'q' to quit.");
        }
    }
}

/// Blocking stdin reader. Lines become commands; in manual mode an empty
/// line toggles recording.
fn stdin_loop(commands: UnboundedSender<Command>, turn_mode: TurnMode) {
    let stdin = io::stdin();
    let mut recording = false;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let input = line.trim();

        let cmd = match input {
            "q" | "quit" | "exit" => Command::Quit,
            "i" | "interrupt" => Command::Interrupt,
            "" if turn_mode == TurnMode::Manual => {
                recording = !recording;
                if recording {
                    println!("(recording, press Enter to send)");
                    Command::BeginRecording
                } else {
                    Command::EndRecording
                }
            }
            "" => continue,
            text => Command::SendText(text.to_string()),
        };

        let quit = matches!(cmd, Command::Quit);
        if commands.send(cmd).is_err() || quit {
            break;
        }
    }
}

// =============================================================================
// Terminal Event Handler
// =============================================================================

/// Prints the conversation to the terminal, queues assistant audio for
/// playback, and forwards tool calls and turn boundaries as commands.
struct TerminalHandler {
    playback: Arc<Mutex<AudioPlaybackService>>,
    commands: UnboundedSender<Command>,
    mid_line: bool,
}

impl TerminalHandler {
    fn new(playback: Arc<Mutex<AudioPlaybackService>>, commands: UnboundedSender<Command>) -> Self {
        Self {
            playback,
            commands,
            mid_line: false,
        }
    }

    fn print_delta(&mut self, delta: &str) {
        if !self.mid_line {
            print!("Assistant: ");
            self.mid_line = true;
        }
        print!("{}", delta);
        let _ = io::stdout().flush();
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

impl EventHandler for TerminalHandler {
    fn on_text_delta(&mut self, delta: &str) {
        self.print_delta(delta);
    }

    fn on_output_transcript_delta(&mut self, delta: &str) {
        self.print_delta(delta);
    }

    fn on_output_transcript_done(&mut self, _transcript: &str) {
        self.end_line();
    }

    fn on_audio_delta(&mut self, audio: Bytes) {
        self.playback.lock().play_audio(audio);
    }

    fn on_input_transcript(&mut self, transcript: &str) {
        self.end_line();
        println!("You said: {}", transcript.trim());
    }

    fn on_function_call(&mut self, name: &str, call_id: &str, arguments: &str) {
        let _ = self.commands.send(Command::FunctionCall {
            name: name.to_string(),
            call_id: call_id.to_string(),
            arguments: arguments.to_string(),
        });
    }

    fn on_speech_started(&mut self) {
        debug!("speech started");
        let _ = self.commands.send(Command::Interrupt);
    }

    fn on_response_done(&mut self) {
        self.end_line();
        let _ = self.commands.send(Command::ResponseFinished);
    }

    fn on_error(&mut self, error: &ErrorInfo) {
        self.end_line();
        error!(
            code = error.code.as_deref().unwrap_or("unknown"),
            "server error: {}",
            error.message.as_deref().unwrap_or("no message")
        );
    }
}

// =============================================================================
// Demo Tool
// =============================================================================

/// Reports the current time so the assistant can answer clock questions.
struct CurrentTime;

#[async_trait]
impl Tool for CurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current time as a Unix timestamp in seconds (UTC)."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, _arguments: Value) -> Result<Value, ToolError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({ "unix_timestamp": now.as_secs() }))
    }
}
