//! Integration tests for the realtime wire protocol
//!
//! A local WebSocket server stands in for the realtime endpoint so the
//! full client can be exercised end to end:
//! - Subprotocol negotiation and session configuration at connect
//! - Event ordering for text, audio, and function-result turns
//! - Audio transcoding to the wire format
//! - Interruption (cancel + truncate) when speech starts mid-response
//! - Tolerance of malformed and unknown events
//! - Function results gated on call ids observed on the connection
//!
//! Note: Tests requiring actual API calls are marked with #[ignore]
//! and require OPENAI_API_KEY environment variable.

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async};

use voicewire::audio::convert::encode_wav;
use voicewire::realtime::messages::ErrorInfo;
use voicewire::{
    AudioFormat, ClientConfig, ClientError, EventHandler, RealtimeClient, TurnMode,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock Server
// =============================================================================

/// Scripted stand-in for the realtime endpoint. Everything the client
/// sends arrives on `received` as parsed JSON; strings pushed through
/// `events` are delivered to the client. The listener outlives each
/// connection, so a client may close and dial the same address again.
/// Dropping `events` shuts the mock down from the server side.
struct MockServer {
    url: String,
    received: UnboundedReceiver<Value>,
    events: UnboundedSender<String>,
}

async fn start_mock() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        'accept: loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(_) => break,
            };
            // The 101 response must grant the subprotocol the client
            // requested or the client rejects the handshake.
            let ws = accept_hdr_async(stream, |_req: &Request, mut response: Response| {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static("realtime"),
                );
                Ok(response)
            })
            .await
            .unwrap();
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let value: Value = serde_json::from_str(text.as_str()).unwrap();
                            if received_tx.send(value).is_err() {
                                break 'accept;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            // Flush the queued close reply, then take the
                            // next connection.
                            let _ = write.flush().await;
                            break;
                        }
                        None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    },
                    event = events_rx.recv() => match event {
                        Some(text) => {
                            if write.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            break 'accept;
                        }
                    },
                }
            }
        }
    });

    MockServer {
        url: format!("ws://{}", addr),
        received: received_rx,
        events: events_tx,
    }
}

async fn next_msg(received: &mut UnboundedReceiver<Value>) -> Value {
    timeout(WAIT, received.recv())
        .await
        .expect("timed out waiting for a client message")
        .expect("connection ended before the expected message")
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn client_for(url: &str, turn_mode: TurnMode, handler: Box<dyn EventHandler>) -> RealtimeClient {
    let config = ClientConfig {
        api_key: "test-key".to_string(),
        url: Some(url.to_string()),
        turn_mode,
        ..Default::default()
    };
    RealtimeClient::new(config, handler).unwrap()
}

// =============================================================================
// Recording Handler
// =============================================================================

#[derive(Default)]
struct ProbeState {
    texts: Vec<String>,
    audio: Vec<Bytes>,
    errors: Vec<String>,
    calls: Vec<(String, String, String)>,
    responses_done: usize,
}

#[derive(Clone, Default)]
struct Probe {
    state: Arc<Mutex<ProbeState>>,
}

impl EventHandler for Probe {
    fn on_text_delta(&mut self, delta: &str) {
        self.state.lock().texts.push(delta.to_string());
    }

    fn on_audio_delta(&mut self, audio: Bytes) {
        self.state.lock().audio.push(audio);
    }

    fn on_error(&mut self, error: &ErrorInfo) {
        self.state
            .lock()
            .errors
            .push(error.message.clone().unwrap_or_default());
    }

    fn on_function_call(&mut self, name: &str, call_id: &str, arguments: &str) {
        self.state.lock().calls.push((
            name.to_string(),
            call_id.to_string(),
            arguments.to_string(),
        ));
    }

    fn on_response_done(&mut self) {
        self.state.lock().responses_done += 1;
    }
}

struct Null;
impl EventHandler for Null {}

// =============================================================================
// Session Configuration
// =============================================================================

/// Test that connecting in manual mode configures the session without
/// turn detection
#[tokio::test]
async fn test_connect_sends_manual_session_config() {
    let mut server = start_mock().await;
    let client = client_for(&server.url, TurnMode::Manual, Box::new(Null));
    client.connect().await.unwrap();

    let update = next_msg(&mut server.received).await;
    assert_eq!(update["type"], "session.update");

    let session = &update["session"];
    assert_eq!(session["input_audio_format"], "pcm16");
    assert_eq!(session["output_audio_format"], "pcm16");
    assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
    assert_eq!(session["tool_choice"], "auto");
    assert!(session["tools"].as_array().unwrap().is_empty());
    assert!(session.get("turn_detection").is_none());

    client.close().await.unwrap();
}

/// Test that connecting in server-VAD mode advertises turn detection
#[tokio::test]
async fn test_connect_sends_vad_session_config() {
    let mut server = start_mock().await;
    let client = client_for(&server.url, TurnMode::ServerVad, Box::new(Null));
    client.connect().await.unwrap();

    let update = next_msg(&mut server.received).await;
    let detection = &update["session"]["turn_detection"];
    assert_eq!(detection["type"], "server_vad");
    assert_eq!(detection["threshold"], 0.5);
    assert_eq!(detection["prefix_padding_ms"], 500);
    assert_eq!(detection["silence_duration_ms"], 200);

    client.close().await.unwrap();
}

/// Test that connect fails when the server does not grant the realtime
/// subprotocol
#[tokio::test]
async fn test_connect_rejects_missing_subprotocol() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // Plain accept sends a 101 with no Sec-WebSocket-Protocol.
        if let Ok((stream, _)) = listener.accept().await {
            let _ = accept_async(stream).await;
        }
    });

    let client = client_for(&format!("ws://{}", addr), TurnMode::Manual, Box::new(Null));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionFailed(_)));
}

// =============================================================================
// Turn Ordering
// =============================================================================

/// Test that a text turn creates the item before requesting the response
#[tokio::test]
async fn test_text_turn_orders_item_before_response() {
    let mut server = start_mock().await;
    let client = client_for(&server.url, TurnMode::Manual, Box::new(Null));
    client.connect().await.unwrap();
    next_msg(&mut server.received).await; // session.update

    client.send_text("What time is it?").await.unwrap();

    let item = next_msg(&mut server.received).await;
    assert_eq!(item["type"], "conversation.item.create");
    assert_eq!(item["item"]["role"], "user");
    assert_eq!(item["item"]["content"][0]["type"], "input_text");
    assert_eq!(item["item"]["content"][0]["text"], "What time is it?");

    let response = next_msg(&mut server.received).await;
    assert_eq!(response["type"], "response.create");
    assert_eq!(response["response"]["modalities"][0], "text");
    assert_eq!(response["response"]["modalities"][1], "audio");

    client.close().await.unwrap();
}

/// Test that an audio turn is transcoded to wire PCM, committed, and in
/// manual mode followed by a response request
#[tokio::test]
async fn test_audio_turn_is_transcoded_and_committed() {
    let mut server = start_mock().await;
    let client = client_for(&server.url, TurnMode::Manual, Box::new(Null));
    client.connect().await.unwrap();
    next_msg(&mut server.received).await;

    // 100 ms of a 440 Hz tone, stereo at 48 kHz.
    let frames = 4800;
    let mut interleaved = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / 48_000.0;
        let sample = (12_000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16;
        interleaved.push(sample);
        interleaved.push(sample);
    }
    let wav = encode_wav(&interleaved, 2, 48_000).unwrap();

    client.send_audio(&wav, AudioFormat::Wav).await.unwrap();

    let append = next_msg(&mut server.received).await;
    assert_eq!(append["type"], "input_audio_buffer.append");
    let pcm = BASE64_STANDARD
        .decode(append["audio"].as_str().unwrap())
        .unwrap();
    // Mono 16-bit at 24 kHz: ~2400 samples, allowing for resampler
    // chunking at the tail.
    let samples = pcm.len() / 2;
    assert!(
        (1888..=2912).contains(&samples),
        "unexpected wire length: {} samples",
        samples
    );

    let commit = next_msg(&mut server.received).await;
    assert_eq!(commit["type"], "input_audio_buffer.commit");

    let response = next_msg(&mut server.received).await;
    assert_eq!(response["type"], "response.create");

    client.close().await.unwrap();
}

/// Test that streamed chunks are appended verbatim and never committed
/// by the client
#[tokio::test]
async fn test_stream_audio_appends_without_commit() {
    let mut server = start_mock().await;
    let client = client_for(&server.url, TurnMode::ServerVad, Box::new(Null));
    client.connect().await.unwrap();
    next_msg(&mut server.received).await;

    let pcm: Vec<u8> = (0..480u16).flat_map(|i| (i as i16).to_le_bytes()).collect();
    client.stream_audio(&pcm).await.unwrap();
    client.send_text("hello").await.unwrap();

    let append = next_msg(&mut server.received).await;
    assert_eq!(append["type"], "input_audio_buffer.append");
    let sent = BASE64_STANDARD
        .decode(append["audio"].as_str().unwrap())
        .unwrap();
    assert_eq!(sent, pcm);

    // The next message is the text item, proving no commit was emitted
    // for the streamed chunk.
    let item = next_msg(&mut server.received).await;
    assert_eq!(item["type"], "conversation.item.create");

    client.close().await.unwrap();
}

// =============================================================================
// Receive Loop
// =============================================================================

/// Test that malformed and unknown events are skipped, server errors are
/// surfaced to the handler, and later events still arrive intact
#[tokio::test]
async fn test_receive_loop_survives_bad_events() {
    let mut server = start_mock().await;
    let probe = Probe::default();
    let state = probe.state.clone();

    let client = Arc::new(client_for(&server.url, TurnMode::Manual, Box::new(probe)));
    client.connect().await.unwrap();
    next_msg(&mut server.received).await;

    let receiver = client.clone();
    let task = tokio::spawn(async move { receiver.handle_messages().await });

    let audio: Vec<u8> = vec![1, 2, 3, 4, 5, 6];
    server.events.send("this is not json".to_string()).unwrap();
    server
        .events
        .send(r#"{"type":"session.genuinely_new_event","detail":42}"#.to_string())
        .unwrap();
    server
        .events
        .send(r#"{"type":"response.audio.delta","delta":"%%%not-base64%%%"}"#.to_string())
        .unwrap();
    server
        .events
        .send(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"buffer too small"}}"#
                .to_string(),
        )
        .unwrap();
    server
        .events
        .send(format!(
            r#"{{"type":"response.audio.delta","delta":"{}"}}"#,
            BASE64_STANDARD.encode(&audio)
        ))
        .unwrap();
    server
        .events
        .send(r#"{"type":"response.text.delta","delta":"still alive"}"#.to_string())
        .unwrap();
    server
        .events
        .send(r#"{"type":"response.done"}"#.to_string())
        .unwrap();

    // Server-side close ends the loop cleanly.
    drop(server.events);
    let result = timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());

    let state = state.lock();
    assert_eq!(state.errors, vec!["buffer too small".to_string()]);
    assert_eq!(state.audio, vec![Bytes::from(audio)]);
    assert_eq!(state.texts, vec!["still alive".to_string()]);
    assert_eq!(state.responses_done, 1);
}

/// Test that speech starting mid-response cancels the response and
/// truncates the in-flight item
#[tokio::test]
async fn test_speech_while_responding_cancels_and_truncates() {
    let mut server = start_mock().await;
    let client = Arc::new(client_for(&server.url, TurnMode::ServerVad, Box::new(Null)));
    client.connect().await.unwrap();
    next_msg(&mut server.received).await;

    let receiver = client.clone();
    let task = tokio::spawn(async move { receiver.handle_messages().await });

    server
        .events
        .send(r#"{"type":"response.created","response":{"id":"resp_1"}}"#.to_string())
        .unwrap();
    server
        .events
        .send(
            r#"{"type":"response.output_item.added","item":{"id":"item_1","type":"message"}}"#
                .to_string(),
        )
        .unwrap();

    let responding = client.clone();
    wait_until("the response to start", move || responding.is_responding()).await;

    server
        .events
        .send(r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":120}"#.to_string())
        .unwrap();

    let cancel = next_msg(&mut server.received).await;
    assert_eq!(cancel["type"], "response.cancel");

    let truncate = next_msg(&mut server.received).await;
    assert_eq!(truncate["type"], "conversation.item.truncate");
    assert_eq!(truncate["item_id"], "item_1");
    assert_eq!(truncate["content_index"], 0);
    assert_eq!(truncate["audio_end_ms"], 0);

    drop(server.events);
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert!(!client.is_responding());
}

// =============================================================================
// Function Calls
// =============================================================================

/// Test that function results are accepted only for observed call ids
/// and carry the expected wire shape
#[tokio::test]
async fn test_function_results_require_an_observed_call() {
    let mut server = start_mock().await;
    let probe = Probe::default();
    let state = probe.state.clone();

    let client = Arc::new(client_for(&server.url, TurnMode::Manual, Box::new(probe)));
    client.connect().await.unwrap();
    next_msg(&mut server.received).await;

    let receiver = client.clone();
    let task = tokio::spawn(async move { receiver.handle_messages().await });

    // A result for a call id the server never mentioned is rejected.
    let err = client
        .send_function_result("call_unseen", "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidCallId(_)));

    server
        .events
        .send(
            r#"{"type":"response.output_item.added","item":{"id":"item_9","type":"function_call","call_id":"call_42","name":"get_current_time"}}"#
                .to_string(),
        )
        .unwrap();
    server
        .events
        .send(
            r#"{"type":"response.function_call_arguments.done","call_id":"call_42","name":"get_current_time","arguments":"{}"}"#
                .to_string(),
        )
        .unwrap();

    let calls = state.clone();
    wait_until("the function call to be dispatched", move || {
        !calls.lock().calls.is_empty()
    })
    .await;
    assert_eq!(
        state.lock().calls[0],
        (
            "get_current_time".to_string(),
            "call_42".to_string(),
            "{}".to_string()
        )
    );

    client
        .send_function_result("call_42", r#"{"unix_timestamp":1700000000}"#)
        .await
        .unwrap();

    let item = next_msg(&mut server.received).await;
    assert_eq!(item["type"], "conversation.item.create");
    assert_eq!(item["item"]["type"], "function_call_output");
    assert_eq!(item["item"]["call_id"], "call_42");
    assert_eq!(item["item"]["output"], r#"{"unix_timestamp":1700000000}"#);

    let response = next_msg(&mut server.received).await;
    assert_eq!(response["type"], "response.create");

    drop(server.events);
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

/// Test that call ids observed on one connection do not authorize
/// results after a reconnect
#[tokio::test]
async fn test_reconnect_forgets_observed_call_ids() {
    let mut server = start_mock().await;
    let probe = Probe::default();
    let state = probe.state.clone();

    let client = Arc::new(client_for(&server.url, TurnMode::Manual, Box::new(probe)));
    client.connect().await.unwrap();
    next_msg(&mut server.received).await; // session.update

    let receiver = client.clone();
    let task = tokio::spawn(async move { receiver.handle_messages().await });

    server
        .events
        .send(
            r#"{"type":"response.function_call_arguments.done","call_id":"call_9","name":"get_current_time","arguments":"{}"}"#
                .to_string(),
        )
        .unwrap();

    let calls = state.clone();
    wait_until("the function call to be dispatched", move || {
        !calls.lock().calls.is_empty()
    })
    .await;

    // Accepted while the connection that announced the id is up.
    client.send_function_result("call_9", "{}").await.unwrap();
    next_msg(&mut server.received).await; // function_call_output item
    next_msg(&mut server.received).await; // response.create

    client.close().await.unwrap();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    // A fresh connection starts with no observed calls.
    client.connect().await.unwrap();
    next_msg(&mut server.received).await; // session.update

    let err = client
        .send_function_result("call_9", "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidCallId(_)));

    client.close().await.unwrap();
}

// =============================================================================
// Live API
// =============================================================================

/// Live text turn against the real endpoint (requires OPENAI_API_KEY)
#[tokio::test]
#[ignore = "Requires OPENAI_API_KEY environment variable"]
async fn test_live_text_turn() {
    let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
    let probe = Probe::default();
    let state = probe.state.clone();

    let config = ClientConfig {
        api_key,
        turn_mode: TurnMode::Manual,
        ..Default::default()
    };
    let client = Arc::new(RealtimeClient::new(config, Box::new(probe)).unwrap());
    client.connect().await.unwrap();

    let receiver = client.clone();
    let task = tokio::spawn(async move { receiver.handle_messages().await });

    client.send_text("Reply with a short greeting.").await.unwrap();

    let done = state.clone();
    timeout(Duration::from_secs(30), async move {
        loop {
            if done.lock().responses_done > 0 {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("no response within 30s");

    client.close().await.unwrap();
    let _ = timeout(WAIT, task).await;

    let state = state.lock();
    assert!(!state.texts.is_empty() || !state.audio.is_empty());
}
