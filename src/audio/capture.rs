//! Microphone capture.
//!
//! Capture runs on a dedicated thread because the device stream is not
//! `Send`. The thread opens the default input device, reports readiness
//! (or the open failure) back to the caller, then keeps the stream alive
//! until the shared `active` flag flips. Stopping joins the thread, so
//! the caller observes a fully released device.
//!
//! Two arms share the machinery:
//! - recording: device frames accumulate in a channel and come back as a
//!   WAV container on stop,
//! - streaming: device frames are transcoded to wire PCM on the fly and
//!   injected into the command queue at capture cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::audio::convert::{
    downmix, f32_to_i16, i16_to_f32, samples_to_bytes, u16_to_i16,
};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::resampler::StreamResampler;
use crate::coordinator::Command;
use crate::realtime::config::PROTOCOL_SAMPLE_RATE;

/// How long to wait for the capture thread to open the device.
const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where captured frames go.
enum CaptureSink {
    /// Accumulate native-format frames for a WAV container on stop.
    Record(crossbeam_channel::Sender<Vec<i16>>),
    /// Transcode to wire PCM and inject into the command queue.
    Stream(UnboundedSender<Command>),
}

/// Records or streams microphone input.
///
/// At most one capture session (of either arm) is active at a time;
/// starting while active is an idempotent no-op.
pub struct AudioCaptureService {
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    frames: Option<crossbeam_channel::Receiver<Vec<i16>>>,
    device_rate: u32,
    device_channels: u16,
}

impl AudioCaptureService {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            worker: None,
            frames: None,
            device_rate: PROTOCOL_SAMPLE_RATE,
            device_channels: 1,
        }
    }

    /// Whether a capture session is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Arm the microphone and accumulate frames until [`stop_recording`].
    ///
    /// Returns once the device is open and capturing. Calling while
    /// already active does nothing.
    ///
    /// [`stop_recording`]: Self::stop_recording
    pub fn start_recording(&mut self) -> AudioResult<()> {
        if self.active.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        match self.spawn_capture(CaptureSink::Record(frame_tx)) {
            Ok(()) => {
                self.frames = Some(frame_rx);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stop recording and return the captured audio as a WAV container
    /// in the device's native rate and channel count.
    ///
    /// Returns empty bytes when no recording is active.
    pub fn stop_recording(&mut self) -> AudioResult<Vec<u8>> {
        if !self.active.swap(false, Ordering::Relaxed) {
            return Ok(Vec::new());
        }
        self.join_worker();

        let mut samples = Vec::new();
        if let Some(rx) = self.frames.take() {
            while let Ok(frame) = rx.try_recv() {
                samples.extend_from_slice(&frame);
            }
        }
        debug!(
            "Recording stopped: {} samples at {} Hz",
            samples.len(),
            self.device_rate
        );
        crate::audio::convert::encode_wav(&samples, self.device_channels, self.device_rate)
    }

    /// Arm the microphone and push wire-format frames into the command
    /// queue until [`stop_streaming`].
    ///
    /// [`stop_streaming`]: Self::stop_streaming
    pub fn start_streaming(&mut self, commands: UnboundedSender<Command>) -> AudioResult<()> {
        if self.active.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        self.spawn_capture(CaptureSink::Stream(commands))
    }

    /// Stop streaming and release the device. No-op when not active.
    pub fn stop_streaming(&mut self) -> AudioResult<()> {
        if !self.active.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        self.join_worker();
        Ok(())
    }

    fn spawn_capture(&mut self, sink: CaptureSink) -> AudioResult<()> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let active = self.active.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_thread(active, ready_tx, sink))
            .map_err(|e| {
                self.active.store(false, Ordering::Relaxed);
                AudioError::Thread(e.to_string())
            })?;

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok((rate, channels))) => {
                self.device_rate = rate;
                self.device_channels = channels;
                self.worker = Some(handle);
                debug!("Capture started: {} Hz, {} channels", rate, channels);
                Ok(())
            }
            Ok(Err(e)) => {
                self.active.store(false, Ordering::Relaxed);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.active.store(false, Ordering::Relaxed);
                let _ = handle.join();
                Err(AudioError::Thread(
                    "capture thread did not report readiness".to_string(),
                ))
            }
        }
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl Default for AudioCaptureService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioCaptureService {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        self.join_worker();
    }
}

/// Body of the capture thread. Owns the device stream for its lifetime.
fn capture_thread(
    active: Arc<AtomicBool>,
    ready: mpsc::Sender<AudioResult<(u32, u16)>>,
    sink: CaptureSink,
) {
    let stream = match open_input_stream(&active, sink) {
        Ok((stream, rate, channels)) => {
            if let Err(e) = stream.play() {
                let _ = ready.send(Err(AudioError::StreamPlay(e.to_string())));
                return;
            }
            let _ = ready.send(Ok((rate, channels)));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while active.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
    debug!("capture thread exiting");
}

/// Open the default input device and wire its callback to the sink.
fn open_input_stream(
    active: &Arc<AtomicBool>,
    sink: CaptureSink,
) -> AudioResult<(cpal::Stream, u32, u16)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceNotAvailable("no default input device".to_string()))?;
    let default_config = device
        .default_input_config()
        .map_err(|e| AudioError::ConfigNotSupported(e.to_string()))?;

    let sample_format = default_config.sample_format();
    let config: cpal::StreamConfig = default_config.into();
    let rate = config.sample_rate.0;
    let channels = config.channels;

    let mut forward = make_forwarder(sink, rate, channels)?;
    let callback_active = active.clone();
    let err_fn = |e: cpal::StreamError| warn!("capture stream error: {}", e);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !callback_active.load(Ordering::Relaxed) {
                    return;
                }
                forward(data.iter().map(|s| f32_to_i16(*s)).collect());
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if !callback_active.load(Ordering::Relaxed) {
                    return;
                }
                forward(data.to_vec());
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                if !callback_active.load(Ordering::Relaxed) {
                    return;
                }
                forward(data.iter().map(|s| u16_to_i16(*s)).collect());
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::ConfigNotSupported(format!(
                "unsupported sample format {:?}",
                other
            )));
        }
    }
    .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

    Ok((stream, rate, channels))
}

/// Build the per-frame sink closure. The streaming arm transcodes from
/// the device's native shape to wire PCM as frames arrive.
fn make_forwarder(
    sink: CaptureSink,
    rate: u32,
    channels: u16,
) -> AudioResult<Box<dyn FnMut(Vec<i16>) + Send>> {
    match sink {
        CaptureSink::Record(tx) => Ok(Box::new(move |frame| {
            let _ = tx.send(frame);
        })),
        CaptureSink::Stream(commands) => {
            let mut converter = if rate != PROTOCOL_SAMPLE_RATE {
                Some(StreamResampler::new(rate, PROTOCOL_SAMPLE_RATE)?)
            } else {
                None
            };

            Ok(Box::new(move |frame| {
                let mono = match downmix(&frame, channels) {
                    Ok(mono) => mono,
                    Err(_) => return,
                };
                let wire = match converter.as_mut() {
                    Some(converter) => {
                        let floats: Vec<f32> = mono.iter().map(|s| i16_to_f32(*s)).collect();
                        match converter.process(&floats) {
                            Ok(out) => out.into_iter().map(f32_to_i16).collect(),
                            Err(_) => return,
                        }
                    }
                    None => mono,
                };
                if wire.is_empty() {
                    return;
                }
                let _ = commands.send(Command::StreamFrame(Bytes::from(samples_to_bytes(&wire))));
            }))
        }
    }
}
