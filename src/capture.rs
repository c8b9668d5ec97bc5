//! Capture loop: microphone frames → encoded outbound events.
//!
//! Reads frames from the [`AudioSource`] at the device's native cadence
//! and, while the turn machine permits, emits `audio_chunk` events in
//! capture-sequence order. Voice-activity detection is delegated to the
//! remote service by default; the local energy gate exists only to avoid
//! sending pure silence, and in manual-VAD mode a `buffer_commit` is
//! emitted once the configured silence duration elapses.
//!
//! Never blocks the playback path: its only shared state is the turn
//! watch channel and the outbound queue.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::audio::{rms_level, AudioSource};
use crate::codec;
use crate::config::{AudioConfig, CaptureConfig, VadMode};
use crate::error::Error;
use crate::events::WireEvent;
use crate::turn::TurnState;

/// Run the capture loop until halt or a device failure.
///
/// A hardware read error surfaces as [`Error::CaptureFailure`] on
/// `fatal_tx` and halts the loop; device failures are not treated as
/// transient, so there is no retry.
pub(crate) async fn run_capture(
    mut source: Box<dyn AudioSource>,
    state_rx: watch::Receiver<TurnState>,
    outbound_tx: mpsc::Sender<WireEvent>,
    audio: AudioConfig,
    cfg: CaptureConfig,
    halt: CancellationToken,
    fatal_tx: mpsc::Sender<Error>,
) {
    let mut silence_ms: u64 = 0;
    let mut committed = false;
    let mut sent: u64 = 0;

    loop {
        let frame = tokio::select! {
            _ = halt.cancelled() => break,
            read = source.read() => match read {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "audio source failure, halting capture");
                    let _ = fatal_tx.send(e).await;
                    break;
                }
            },
        };

        if !state_rx.borrow().capture_enabled() {
            // Outbound audio is disabled until the next turn; a stale
            // silence run must not trigger a commit on re-enable.
            silence_ms = 0;
            committed = false;
            continue;
        }

        let level = rms_level(frame.bytes());
        let silent = if cfg.energy_gate > 0.0 {
            level < cfg.energy_gate
        } else {
            level == 0.0
        };

        if silent {
            if cfg.vad_mode == VadMode::Manual {
                silence_ms += frame.duration_ms(audio.sample_rate);
                if silence_ms >= cfg.commit_silence_ms && !committed {
                    committed = true;
                    tracing::debug!(silence_ms, "silence run complete, committing buffer");
                    if outbound_tx.send(WireEvent::BufferCommit).await.is_err() {
                        break;
                    }
                }
            }
            if cfg.energy_gate > 0.0 {
                continue;
            }
        } else {
            silence_ms = 0;
            committed = false;
        }

        sent += 1;
        if sent == 1 || sent.is_multiple_of(100) {
            tracing::debug!(
                chunk = sent,
                seq = frame.seq(),
                bytes = frame.len(),
                "forwarding captured audio"
            );
        }
        let event = WireEvent::AudioChunk {
            audio: codec::encode(&frame),
        };
        if outbound_tx.send(event).await.is_err() {
            break;
        }
    }
    tracing::debug!(chunks = sent, "capture loop stopped");
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFrame;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    struct ScriptedSource {
        rx: mpsc::Receiver<crate::error::Result<AudioFrame>>,
    }

    #[async_trait]
    impl AudioSource for ScriptedSource {
        async fn read(&mut self) -> crate::error::Result<AudioFrame> {
            match self.rx.recv().await {
                Some(result) => result,
                // Keep the loop parked once the script runs out.
                None => std::future::pending().await,
            }
        }
    }

    fn voiced(seq: u64) -> AudioFrame {
        // 100 samples of a loud square wave, distinct first byte per seq.
        let mut bytes: Vec<u8> = (0..100)
            .flat_map(|i: i32| {
                let sample: i16 = if i % 2 == 0 { 20000 } else { -20000 };
                sample.to_le_bytes()
            })
            .collect();
        bytes[0] = seq as u8;
        AudioFrame::new(seq, bytes)
    }

    fn silent(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, vec![0u8; 200])
    }

    /// 100-sample frames at 1kHz = 100ms each, for quick silence math.
    fn test_audio() -> AudioConfig {
        AudioConfig {
            sample_rate: 1000,
            frame_samples: 100,
        }
    }

    struct Harness {
        source_tx: mpsc::Sender<crate::error::Result<AudioFrame>>,
        state_tx: watch::Sender<TurnState>,
        outbound_rx: mpsc::Receiver<WireEvent>,
        fatal_rx: mpsc::Receiver<Error>,
        halt: CancellationToken,
    }

    fn spawn_capture(cfg: CaptureConfig, initial: TurnState) -> Harness {
        let (source_tx, source_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(initial);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (fatal_tx, fatal_rx) = mpsc::channel(4);
        let halt = CancellationToken::new();

        tokio::spawn(run_capture(
            Box::new(ScriptedSource { rx: source_rx }),
            state_rx,
            outbound_tx,
            test_audio(),
            cfg,
            halt.clone(),
            fatal_tx,
        ));

        Harness {
            source_tx,
            state_tx,
            outbound_rx,
            fatal_rx,
            halt,
        }
    }

    async fn next_event(h: &mut Harness) -> WireEvent {
        timeout(Duration::from_millis(200), h.outbound_rx.recv())
            .await
            .expect("outbound event expected")
            .expect("channel open")
    }

    #[tokio::test]
    async fn forwards_frames_in_capture_order() {
        let mut h = spawn_capture(
            CaptureConfig {
                energy_gate: 0.0,
                ..CaptureConfig::default()
            },
            TurnState::Listening,
        );

        for seq in 0..5 {
            h.source_tx.send(Ok(voiced(seq))).await.unwrap();
        }
        for seq in 0..5u64 {
            match next_event(&mut h).await {
                WireEvent::AudioChunk { audio } => {
                    let frame = codec::decode(&audio, seq).unwrap();
                    assert_eq!(frame.bytes()[0], seq as u8, "out of capture order");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        h.halt.cancel();
    }

    #[tokio::test]
    async fn drops_frames_while_capture_disabled() {
        let mut h = spawn_capture(
            CaptureConfig {
                energy_gate: 0.0,
                ..CaptureConfig::default()
            },
            TurnState::AwaitingResponse,
        );

        h.source_tx.send(Ok(voiced(0))).await.unwrap();
        assert!(
            timeout(Duration::from_millis(50), h.outbound_rx.recv())
                .await
                .is_err(),
            "nothing may be sent while awaiting a response"
        );

        h.state_tx.send_replace(TurnState::Listening);
        h.source_tx.send(Ok(voiced(1))).await.unwrap();
        assert!(matches!(
            next_event(&mut h).await,
            WireEvent::AudioChunk { .. }
        ));
        h.halt.cancel();
    }

    #[tokio::test]
    async fn energy_gate_suppresses_silence() {
        let mut h = spawn_capture(
            CaptureConfig {
                energy_gate: 0.01,
                ..CaptureConfig::default()
            },
            TurnState::Listening,
        );

        h.source_tx.send(Ok(silent(0))).await.unwrap();
        h.source_tx.send(Ok(voiced(1))).await.unwrap();

        // Only the voiced frame comes through.
        match next_event(&mut h).await {
            WireEvent::AudioChunk { audio } => {
                assert_eq!(codec::decode(&audio, 1).unwrap().bytes()[0], 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        h.halt.cancel();
    }

    #[tokio::test]
    async fn manual_mode_commits_once_per_silence_run() {
        let mut h = spawn_capture(
            CaptureConfig {
                energy_gate: 0.01,
                vad_mode: VadMode::Manual,
                commit_silence_ms: 250,
            },
            TurnState::Listening,
        );

        h.source_tx.send(Ok(voiced(0))).await.unwrap();
        // 3 × 100ms of silence crosses the 250ms threshold.
        for seq in 1..=3 {
            h.source_tx.send(Ok(silent(seq))).await.unwrap();
        }
        // Further silence must not commit again.
        h.source_tx.send(Ok(silent(4))).await.unwrap();

        assert!(matches!(
            next_event(&mut h).await,
            WireEvent::AudioChunk { .. }
        ));
        assert!(matches!(next_event(&mut h).await, WireEvent::BufferCommit));
        assert!(
            timeout(Duration::from_millis(50), h.outbound_rx.recv())
                .await
                .is_err(),
            "one commit per silence run"
        );
        h.halt.cancel();
    }

    #[tokio::test]
    async fn device_failure_is_fatal_and_halts() {
        let mut h = spawn_capture(CaptureConfig::default(), TurnState::Listening);

        h.source_tx
            .send(Err(Error::CaptureFailure("mic unplugged".into())))
            .await
            .unwrap();

        let fatal = timeout(Duration::from_millis(200), h.fatal_rx.recv())
            .await
            .expect("fatal error expected")
            .expect("channel open");
        assert!(matches!(fatal, Error::CaptureFailure(_)));

        // The loop halted: nothing more is read or sent.
        h.source_tx.send(Ok(voiced(1))).await.unwrap();
        assert!(timeout(Duration::from_millis(50), h.outbound_rx.recv())
            .await
            .is_err());
    }
}
