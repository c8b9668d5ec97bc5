//! Real microphone/speaker backend via cpal (`--features device-cpal`).
//!
//! cpal streams are driven from dedicated OS threads because a
//! `cpal::Stream` is not `Send`; the async traits talk to those threads
//! through bounded queues. The output side keeps its own small ring so
//! that `write` paces the drain at device speed — buffered speech stays
//! in the engine's [`crate::playback::PlaybackBuffer`] where barge-in can
//! still clear it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::{AudioFrame, AudioSink, AudioSource, BYTES_PER_SAMPLE};
use crate::config::AudioConfig;
use crate::error::{Error, Result};

/// Output ring capacity in frames: enough to keep the device fed,
/// small enough that barge-in latency stays well under 100ms.
const SINK_RING_FRAMES: usize = 2;

// ── Capture ───────────────────────────────────────────────────────

/// Default input device as an [`AudioSource`].
pub struct CpalSource {
    chunk_rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    frame_bytes: usize,
    seq: u64,
    stop: Arc<AtomicBool>,
}

impl CpalSource {
    /// Open the default input device at the session sample rate.
    pub fn open(audio: &AudioConfig) -> Result<Self> {
        let sample_rate = audio.sample_rate;
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(64);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::result::Result<(), String>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        // The stream lives on its own thread until the source is dropped.
        std::thread::spawn(move || {
            let stream = match build_input_stream(sample_rate, chunk_tx) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            while !stop_flag.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::CaptureFailure(e)),
            Err(_) => return Err(Error::CaptureFailure("input thread died".into())),
        }

        Ok(Self {
            chunk_rx,
            pending: Vec::new(),
            frame_bytes: audio.frame_bytes(),
            seq: 0,
            stop,
        })
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    async fn read(&mut self) -> Result<AudioFrame> {
        while self.pending.len() < self.frame_bytes {
            match self.chunk_rx.recv().await {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None => return Err(Error::CaptureFailure("input stream ended".into())),
            }
        }
        let rest = self.pending.split_off(self.frame_bytes);
        let bytes = std::mem::replace(&mut self.pending, rest);
        let frame = AudioFrame::new(self.seq, bytes);
        self.seq += 1;
        Ok(frame)
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn build_input_stream(
    sample_rate: u32,
    chunk_tx: mpsc::Sender<Vec<u8>>,
) -> std::result::Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "no input device available".to_string())?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| e.to_string())?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| format!("no mono input config at {sample_rate}Hz"))?;
    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        "audio capture initialized"
    );

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(data.len() * BYTES_PER_SAMPLE);
                for &sample in data {
                    let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
                // Never block the realtime callback; a full queue means
                // the session is stalled anyway.
                if chunk_tx.try_send(bytes).is_err() {
                    tracing::warn!("capture queue full, dropping device chunk");
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| e.to_string())
}

// ── Playback ──────────────────────────────────────────────────────

struct SinkShared {
    ring: Mutex<VecDeque<u8>>,
    space: Notify,
    failed: AtomicBool,
}

/// Default output device as an [`AudioSink`].
pub struct CpalSink {
    shared: Arc<SinkShared>,
    capacity: usize,
    stop: Arc<AtomicBool>,
}

impl CpalSink {
    /// Open the default output device at the session sample rate.
    pub fn open(audio: &AudioConfig) -> Result<Self> {
        let sample_rate = audio.sample_rate;
        let shared = Arc::new(SinkShared {
            ring: Mutex::new(VecDeque::new()),
            space: Notify::new(),
            failed: AtomicBool::new(false),
        });
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::result::Result<(), String>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let shared_thread = Arc::clone(&shared);

        std::thread::spawn(move || {
            let stream = match build_output_stream(sample_rate, shared_thread) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            while !stop_flag.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::PlaybackFailure(e)),
            Err(_) => return Err(Error::PlaybackFailure("output thread died".into())),
        }

        Ok(Self {
            shared,
            capacity: audio.frame_bytes() * SINK_RING_FRAMES,
            stop,
        })
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        let bytes = frame.bytes();
        let mut offset = 0;
        while offset < bytes.len() {
            if self.shared.failed.load(Ordering::SeqCst) {
                return Err(Error::PlaybackFailure("output stream failed".into()));
            }
            let taken = {
                let mut ring = self.shared.ring.lock();
                let space = self.capacity.saturating_sub(ring.len());
                let take = space.min(bytes.len() - offset);
                ring.extend(bytes[offset..offset + take].iter().copied());
                take
            };
            offset += taken;
            if offset < bytes.len() {
                // Ring full: wait for the device callback to make room.
                self.shared.space.notified().await;
            }
        }
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn build_output_stream(
    sample_rate: u32,
    shared: Arc<SinkShared>,
) -> std::result::Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no output device available".to_string())?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| e.to_string())?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: stereo, with samples duplicated across channels.
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| format!("no output config at {sample_rate}Hz"))?;
    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let err_shared = Arc::clone(&shared);
    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                {
                    let mut ring = shared.ring.lock();
                    for frame in data.chunks_mut(channels) {
                        let sample = match (ring.pop_front(), ring.pop_front()) {
                            (Some(lo), Some(hi)) => {
                                f32::from(i16::from_le_bytes([lo, hi])) / 32768.0
                            }
                            // Underrun plays silence; the engine's
                            // pre-buffer keeps this rare.
                            _ => 0.0,
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                }
                shared.space.notify_one();
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                err_shared.failed.store(true, Ordering::SeqCst);
                err_shared.space.notify_one();
            },
            None,
        )
        .map_err(|e| e.to_string())
}
