//! Speaker playback.
//!
//! Inbound assistant audio is enqueued into a bounded FIFO and drained by
//! a dedicated worker thread that owns the output device stream. The
//! queue never blocks the producer: when full, the oldest chunk is
//! evicted to make room. Barge-in clears the queue and abandons whatever
//! the worker had in flight.
//!
//! The worker also tracks how many device frames of assistant audio have
//! actually reached the speaker, which response truncation needs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::audio::convert::{bytes_to_samples, f32_to_i16, i16_to_f32, PcmFormat};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::resampler::StreamResampler;
use crate::realtime::config::PROTOCOL_SAMPLE_RATE;

/// Fixed capacity of the playback queue.
const QUEUE_CAPACITY: usize = 20;

/// Worker dequeue timeout, bounds stop-request latency.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// A chunk of wire-format audio (24 kHz mono 16-bit PCM).
pub type AudioChunk = Bytes;

/// Cloneable handle onto playback progress of the current assistant item.
#[derive(Clone)]
pub struct PlaybackProgress {
    frames: Arc<AtomicU64>,
    rate: Arc<AtomicU32>,
}

impl PlaybackProgress {
    /// Milliseconds of audio played since the last [`reset`].
    ///
    /// [`reset`]: Self::reset
    pub fn played_ms(&self) -> u64 {
        let rate = self.rate.load(Ordering::Relaxed) as u64;
        if rate == 0 {
            return 0;
        }
        self.frames.load(Ordering::Relaxed) * 1000 / rate
    }

    /// Restart the counter, typically at the start of a new assistant item.
    pub fn reset(&self) {
        self.frames.store(0, Ordering::Relaxed);
    }
}

/// Plays inbound audio chunks in arrival order on the default output device.
pub struct AudioPlaybackService {
    queue_tx: crossbeam_channel::Sender<AudioChunk>,
    queue_rx: crossbeam_channel::Receiver<AudioChunk>,
    shared: Arc<Mutex<VecDeque<f32>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    frames_played: Arc<AtomicU64>,
    device_rate: Arc<AtomicU32>,
}

impl AudioPlaybackService {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        Self {
            queue_tx,
            queue_rx,
            shared: Arc::new(Mutex::new(VecDeque::new())),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            frames_played: Arc::new(AtomicU64::new(0)),
            device_rate: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Handle for reading and resetting playback progress.
    pub fn progress(&self) -> PlaybackProgress {
        PlaybackProgress {
            frames: self.frames_played.clone(),
            rate: self.device_rate.clone(),
        }
    }

    /// Whether the playback worker is currently running.
    pub fn is_playing(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Number of chunks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue_rx.len()
    }

    /// Enqueue a chunk for playback, evicting the oldest on overflow.
    /// Never blocks and never fails. Starts the worker if none runs.
    pub fn play_audio(&mut self, chunk: AudioChunk) {
        self.enqueue(chunk);
        self.ensure_worker();
    }

    fn enqueue(&self, chunk: AudioChunk) {
        if let Err(crossbeam_channel::TrySendError::Full(chunk)) = self.queue_tx.try_send(chunk) {
            // Single producer, so one eviction is enough to make room.
            let _ = self.queue_rx.try_recv();
            let _ = self.queue_tx.try_send(chunk);
        }
    }

    fn ensure_worker(&mut self) {
        if self.is_playing() {
            return;
        }

        self.stop.store(false, Ordering::Relaxed);
        let queue = self.queue_rx.clone();
        let shared = self.shared.clone();
        let stop = self.stop.clone();
        let frames = self.frames_played.clone();
        let rate = self.device_rate.clone();

        match thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_thread(queue, shared, stop, frames, rate))
        {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => error!("failed to spawn playback thread: {}", e),
        }
    }

    /// Barge-in: drop all queued chunks and the device-side backlog, and
    /// signal the worker to stop without playing out. Does not wait for
    /// the worker to exit.
    pub fn stop_immediately(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        while self.queue_rx.try_recv().is_ok() {}
        self.shared.lock().clear();
    }

    /// Stop and release the output device, joining the worker.
    pub fn cleanup(&mut self) {
        self.stop_immediately();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("playback thread panicked");
            }
        }
    }
}

impl Default for AudioPlaybackService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioPlaybackService {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Body of the playback worker. Owns the device stream for its lifetime.
fn playback_thread(
    queue: crossbeam_channel::Receiver<AudioChunk>,
    shared: Arc<Mutex<VecDeque<f32>>>,
    stop: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
    device_rate: Arc<AtomicU32>,
) {
    let (stream, rate) = match open_output_stream(shared.clone(), frames_played) {
        Ok(v) => v,
        Err(e) => {
            error!("playback device unavailable: {}", e);
            return;
        }
    };
    if let Err(e) = stream.play() {
        error!("failed to start playback stream: {}", e);
        return;
    }
    device_rate.store(rate, Ordering::Relaxed);

    let mut converter = if rate != PROTOCOL_SAMPLE_RATE {
        match StreamResampler::new(PROTOCOL_SAMPLE_RATE, rate) {
            Ok(c) => Some(c),
            Err(e) => {
                error!("playback resampler unavailable: {}", e);
                return;
            }
        }
    } else {
        None
    };

    // Keep roughly 100 ms buffered device-side; more would defeat barge-in.
    let pace_limit = rate as usize / 10;

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match queue.recv_timeout(DRAIN_POLL) {
            Ok(chunk) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let samples = match bytes_to_samples(&chunk, PcmFormat::I16) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("dropping malformed audio chunk: {}", e);
                        continue;
                    }
                };
                let floats: Vec<f32> = samples.iter().map(|s| i16_to_f32(*s)).collect();
                let device_samples = match converter.as_mut() {
                    Some(converter) => match converter.process(&floats) {
                        Ok(out) => out,
                        Err(e) => {
                            warn!("dropping chunk, resample failed: {}", e);
                            continue;
                        }
                    },
                    None => floats,
                };
                shared.lock().extend(device_samples);

                // Emulate a synchronous device write: wait for the chunk to
                // mostly drain before pulling the next one.
                while !stop.load(Ordering::Relaxed) && shared.lock().len() > pace_limit {
                    thread::sleep(Duration::from_millis(5));
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    drop(stream);
    debug!("playback thread exiting");
}

/// Open the default output device; the callback drains the shared buffer
/// and fans mono samples out across the device channels.
fn open_output_stream(
    shared: Arc<Mutex<VecDeque<f32>>>,
    frames_played: Arc<AtomicU64>,
) -> AudioResult<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotAvailable("no default output device".to_string()))?;
    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::ConfigNotSupported(e.to_string()))?;

    let sample_format = default_config.sample_format();
    let config: cpal::StreamConfig = default_config.into();
    let rate = config.sample_rate.0;
    let channels = (config.channels as usize).max(1);

    let err_fn = |e: cpal::StreamError| warn!("playback stream error: {}", e);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut buf = shared.lock();
                let mut consumed = 0u64;
                for frame in data.chunks_mut(channels) {
                    let sample = match buf.pop_front() {
                        Some(s) => {
                            consumed += 1;
                            s
                        }
                        None => 0.0,
                    };
                    for slot in frame {
                        *slot = sample;
                    }
                }
                drop(buf);
                if consumed > 0 {
                    frames_played.fetch_add(consumed, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut buf = shared.lock();
                let mut consumed = 0u64;
                for frame in data.chunks_mut(channels) {
                    let sample = match buf.pop_front() {
                        Some(s) => {
                            consumed += 1;
                            f32_to_i16(s)
                        }
                        None => 0,
                    };
                    for slot in frame {
                        *slot = sample;
                    }
                }
                drop(buf);
                if consumed > 0 {
                    frames_played.fetch_add(consumed, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            &config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                let mut buf = shared.lock();
                let mut consumed = 0u64;
                for frame in data.chunks_mut(channels) {
                    let sample = match buf.pop_front() {
                        Some(s) => {
                            consumed += 1;
                            (f32_to_i16(s) as i32 + 32768) as u16
                        }
                        None => 32768,
                    };
                    for slot in frame {
                        *slot = sample;
                    }
                }
                drop(buf);
                if consumed > 0 {
                    frames_played.fetch_add(consumed, Ordering::Relaxed);
                }
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

    Ok((stream, rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::convert::samples_to_bytes;

    fn chunk(tag: i16) -> AudioChunk {
        Bytes::from(samples_to_bytes(&[tag; 4]))
    }

    fn tag_of(chunk: &AudioChunk) -> i16 {
        bytes_to_samples(chunk, PcmFormat::I16).unwrap()[0]
    }

    #[test]
    fn test_queue_overflow_drops_oldest() {
        let playback = AudioPlaybackService::new();
        for tag in 1..=21 {
            playback.enqueue(chunk(tag));
        }

        assert_eq!(playback.queued(), QUEUE_CAPACITY);
        let tags: Vec<i16> = std::iter::from_fn(|| playback.queue_rx.try_recv().ok())
            .map(|c| tag_of(&c))
            .collect();
        let expected: Vec<i16> = (2..=21).collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn test_queue_preserves_fifo_order() {
        let playback = AudioPlaybackService::new();
        for tag in 1..=5 {
            playback.enqueue(chunk(tag));
        }
        let tags: Vec<i16> = std::iter::from_fn(|| playback.queue_rx.try_recv().ok())
            .map(|c| tag_of(&c))
            .collect();
        assert_eq!(tags, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_stop_immediately_empties_queue() {
        let mut playback = AudioPlaybackService::new();
        for tag in 1..=5 {
            playback.enqueue(chunk(tag));
        }
        assert_eq!(playback.queued(), 5);

        playback.stop_immediately();
        assert_eq!(playback.queued(), 0);
        assert!(playback.shared.lock().is_empty());
    }

    #[test]
    fn test_progress_starts_at_zero() {
        let playback = AudioPlaybackService::new();
        let progress = playback.progress();
        assert_eq!(progress.played_ms(), 0);
        progress.reset();
        assert_eq!(progress.played_ms(), 0);
    }

    #[test]
    #[serial_test::serial]
    fn test_playback_worker_stops_on_interrupt() {
        let mut playback = AudioPlaybackService::new();
        // Half a second of faint tone per chunk.
        let samples: Vec<i16> = (0..12000).map(|i| ((i % 60) * 100) as i16).collect();
        for _ in 0..10 {
            playback.play_audio(Bytes::from(samples_to_bytes(&samples)));
        }
        if !playback.is_playing() {
            // No output device on this machine.
            return;
        }

        thread::sleep(Duration::from_millis(150));
        playback.stop_immediately();
        assert_eq!(playback.queued(), 0);

        playback.cleanup();
        assert!(!playback.is_playing());
    }
}
