//! Inbound event dispatch.
//!
//! [`EventRouter`] classifies decoded server events and invokes the
//! matching method on the registered [`EventHandler`]. Every method has a
//! default no-op body, so consumers implement only the kinds they care
//! about. Unknown or unhandled event kinds are ignored, never an error.
//!
//! Handler methods run on the receive-loop task and must only hand data
//! onward (enqueue a chunk, push to a channel), never do the work inline.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};

use super::messages::{ErrorInfo, ServerEvent};

/// Callbacks for the event kinds a consumer can react to.
#[allow(unused_variables)]
pub trait EventHandler: Send {
    /// Incremental text of a text-modality response.
    fn on_text_delta(&mut self, delta: &str) {}

    /// Decoded PCM16 audio of an assistant turn.
    fn on_audio_delta(&mut self, audio: Bytes) {}

    /// Completed transcription of the user's audio input.
    fn on_input_transcript(&mut self, transcript: &str) {}

    /// Incremental transcript of the assistant's audio.
    fn on_output_transcript_delta(&mut self, delta: &str) {}

    /// Full transcript of the assistant's audio once complete.
    fn on_output_transcript_done(&mut self, transcript: &str) {}

    /// A function call with complete arguments.
    fn on_function_call(&mut self, name: &str, call_id: &str, arguments: &str) {}

    /// A server-reported protocol error. The session remains open.
    fn on_error(&mut self, error: &ErrorInfo) {}

    /// Server VAD detected the user starting to speak.
    fn on_speech_started(&mut self) {}

    /// Server VAD detected the user going quiet.
    fn on_speech_stopped(&mut self) {}

    /// The in-flight response finished.
    fn on_response_done(&mut self) {}
}

/// Routes server events to the registered handler.
pub struct EventRouter {
    handler: Box<dyn EventHandler>,
    // call_id -> function name, fed by output_item.added for function
    // calls whose arguments.done event omits the name.
    pending_calls: HashMap<String, String>,
}

impl EventRouter {
    pub fn new(handler: Box<dyn EventHandler>) -> Self {
        Self {
            handler,
            pending_calls: HashMap::new(),
        }
    }

    /// Dispatch one event. Unrecognized kinds fall through silently.
    pub fn dispatch(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ResponseTextDelta { delta, .. } => {
                self.handler.on_text_delta(delta);
            }
            ServerEvent::ResponseAudioDelta { delta, .. } => {
                match ServerEvent::decode_audio_delta(delta) {
                    Ok(bytes) => self.handler.on_audio_delta(Bytes::from(bytes)),
                    Err(e) => warn!("dropping undecodable audio delta: {}", e),
                }
            }
            ServerEvent::InputAudioTranscriptionCompleted { transcript, .. } => {
                if let Some(transcript) = transcript {
                    self.handler.on_input_transcript(transcript);
                }
            }
            ServerEvent::ResponseAudioTranscriptDelta { delta, .. } => {
                self.handler.on_output_transcript_delta(delta);
            }
            ServerEvent::ResponseAudioTranscriptDone { transcript, .. } => {
                if let Some(transcript) = transcript {
                    self.handler.on_output_transcript_done(transcript);
                }
            }
            ServerEvent::ResponseOutputItemAdded { item, .. } => {
                if let Some(item) = item {
                    if item.item_type.as_deref() == Some("function_call") {
                        if let (Some(call_id), Some(name)) = (&item.call_id, &item.name) {
                            self.pending_calls.insert(call_id.clone(), name.clone());
                        }
                    }
                }
            }
            ServerEvent::ResponseFunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                let Some(call_id) = call_id else {
                    warn!("function call arguments without a call id");
                    return;
                };
                let resolved = name
                    .clone()
                    .or_else(|| self.pending_calls.get(call_id).cloned());
                let Some(name) = resolved else {
                    warn!("function call {} has no resolvable name", call_id);
                    return;
                };
                let arguments = arguments.as_deref().unwrap_or("{}");
                self.handler.on_function_call(&name, call_id, arguments);
                self.pending_calls.remove(call_id);
            }
            ServerEvent::Error { error } => {
                let error = error.clone().unwrap_or_default();
                self.handler.on_error(&error);
            }
            ServerEvent::InputAudioBufferSpeechStarted { .. } => {
                self.handler.on_speech_started();
            }
            ServerEvent::InputAudioBufferSpeechStopped { .. } => {
                self.handler.on_speech_stopped();
            }
            ServerEvent::ResponseDone { .. } => {
                self.handler.on_response_done();
            }
            other => {
                debug!("ignoring event: {:?}", other);
            }
        }
    }
}
