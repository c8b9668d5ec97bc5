//! Playback buffer and drain: absorbs network jitter, plays continuously.
//!
//! An ordered queue of decoded frames, FIFO by arrival order — delivery
//! order is the authoritative play order. The receive side pushes frames
//! as `response_audio_delta` events arrive; a continuously running drain
//! task pops them to the [`AudioSink`] only while the turn machine says
//! the agent holds the floor.
//!
//! Policy choices:
//! - Empty buffer blocks the drain; frames are never dropped to skip an
//!   underrun. Callers wanting gapless low-latency playback pre-buffer a
//!   minimum depth before the first pop (see `prebuffer_frames`).
//! - On barge-in the buffer is cleared atomically and the drain pauses;
//!   it never resumes mid-speech.
//! - Capacity is unbounded: response length bounds it naturally, so no
//!   backpressure is required.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioFrame, AudioSink};
use crate::error::Error;
use crate::turn::TurnState;

// ── Buffer ────────────────────────────────────────────────────────

struct Inner {
    queue: VecDeque<AudioFrame>,
    /// The first pop of a response waits until the queue reaches the
    /// pre-buffer depth (or the response finishes early).
    primed: bool,
    /// No more frames are coming for the current response.
    eos: bool,
}

/// Jitter-absorbing FIFO between the receive task and the drain task.
pub struct PlaybackBuffer {
    inner: Mutex<Inner>,
    prebuffer_frames: usize,
    /// Signalled on push / priming changes.
    frames: Notify,
    /// Signalled when the tail of a finished response has fully drained.
    drained: Notify,
}

impl PlaybackBuffer {
    pub fn new(prebuffer_frames: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                primed: false,
                eos: false,
            }),
            prebuffer_frames,
            frames: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Append one decoded frame in arrival order.
    pub fn push(&self, frame: AudioFrame) {
        {
            let mut inner = self.inner.lock();
            inner.queue.push_back(frame);
            if !inner.primed && inner.queue.len() >= self.prebuffer_frames {
                inner.primed = true;
            }
        }
        self.frames.notify_one();
    }

    /// Mark the current response complete: whatever is queued is the
    /// tail, so release it even below the pre-buffer depth. If the drain
    /// already emptied the queue, the tail signal fires immediately.
    pub fn finish(&self) {
        let already_empty = {
            let mut inner = self.inner.lock();
            if inner.queue.is_empty() {
                inner.primed = false;
                inner.eos = false;
                true
            } else {
                inner.eos = true;
                inner.primed = true;
                false
            }
        };
        if already_empty {
            self.drained.notify_one();
        } else {
            self.frames.notify_one();
        }
    }

    /// Atomically clear the queue and reset priming (barge-in).
    /// Returns the number of frames discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let discarded = inner.queue.len();
        inner.queue.clear();
        inner.primed = false;
        inner.eos = false;
        discarded
    }

    /// Pop the next frame if the buffer is primed and non-empty.
    ///
    /// When the pop drains the tail of a finished response, priming is
    /// reset for the next response and the `tail_drained` waiters wake.
    pub fn pop_ready(&self) -> Option<AudioFrame> {
        let mut tail_complete = false;
        let frame = {
            let mut inner = self.inner.lock();
            if !inner.primed {
                return None;
            }
            let frame = inner.queue.pop_front()?;
            if inner.queue.is_empty() && inner.eos {
                inner.primed = false;
                inner.eos = false;
                tail_complete = true;
            }
            frame
        };
        if tail_complete {
            self.drained.notify_one();
        }
        Some(frame)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Wait for new frames or a priming change.
    pub async fn frames_notified(&self) {
        self.frames.notified().await;
    }

    /// Wait for a finished response's tail to fully drain.
    pub async fn tail_drained(&self) {
        self.drained.notified().await;
    }
}

// ── Drain task ────────────────────────────────────────────────────

/// Continuously pop frames to the sink while the turn state permits.
///
/// Blocks on buffer-empty and on turn-state-not-speaking; wakes on a halt
/// signal distinct from "buffer non-empty" so shutdown is bounded.
pub(crate) async fn run_drain(
    buffer: Arc<PlaybackBuffer>,
    mut sink: Box<dyn AudioSink>,
    mut state_rx: watch::Receiver<TurnState>,
    halt: CancellationToken,
    fatal_tx: mpsc::Sender<Error>,
) {
    loop {
        if !state_rx.borrow().playback_enabled() {
            tokio::select! {
                _ = halt.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        match buffer.pop_ready() {
            Some(frame) => {
                if let Err(e) = sink.write(&frame).await {
                    tracing::error!(error = %e, "playback sink failure");
                    let _ = fatal_tx.send(e).await;
                    break;
                }
            }
            None => {
                tokio::select! {
                    _ = halt.cancelled() => break,
                    _ = buffer.frames_notified() => {}
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    tracing::debug!("playback drain stopped");
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, vec![seq as u8; 4])
    }

    #[test]
    fn fifo_by_arrival_order() {
        let buf = PlaybackBuffer::new(0);
        buf.push(frame(2));
        buf.push(frame(0));
        buf.push(frame(1));

        assert_eq!(buf.pop_ready().unwrap().seq(), 2);
        assert_eq!(buf.pop_ready().unwrap().seq(), 0);
        assert_eq!(buf.pop_ready().unwrap().seq(), 1);
        assert!(buf.pop_ready().is_none());
    }

    #[test]
    fn prebuffer_holds_first_pop_until_depth() {
        let buf = PlaybackBuffer::new(3);
        buf.push(frame(0));
        buf.push(frame(1));
        assert!(buf.pop_ready().is_none(), "below pre-buffer depth");

        buf.push(frame(2));
        assert!(buf.pop_ready().is_some(), "depth reached");
        // Once primed, underrun does not re-arm the pre-buffer gate.
        assert!(buf.pop_ready().is_some());
        assert!(buf.pop_ready().is_some());
        buf.push(frame(3));
        assert!(buf.pop_ready().is_some());
    }

    #[test]
    fn finish_releases_a_short_response() {
        let buf = PlaybackBuffer::new(100);
        buf.push(frame(0));
        assert!(buf.pop_ready().is_none());

        buf.finish();
        assert_eq!(buf.pop_ready().unwrap().seq(), 0);
    }

    #[tokio::test]
    async fn finish_on_empty_queue_signals_tail_immediately() {
        let buf = PlaybackBuffer::new(0);
        buf.push(frame(0));
        buf.pop_ready().unwrap();

        // Drain got ahead of the done event; finish must not deadlock.
        buf.finish();
        assert!(timeout(Duration::from_millis(20), buf.tail_drained())
            .await
            .is_ok());
    }

    #[test]
    fn clear_discards_and_resets_priming() {
        let buf = PlaybackBuffer::new(2);
        buf.push(frame(0));
        buf.push(frame(1));
        buf.push(frame(2));

        assert_eq!(buf.clear(), 3);
        assert!(buf.is_empty());
        assert!(buf.pop_ready().is_none());

        // Next response pre-buffers from scratch.
        buf.push(frame(3));
        assert!(buf.pop_ready().is_none());
        buf.push(frame(4));
        assert_eq!(buf.pop_ready().unwrap().seq(), 3);
    }

    #[tokio::test]
    async fn tail_drained_fires_only_after_finish() {
        let buf = PlaybackBuffer::new(0);
        buf.push(frame(0));
        buf.pop_ready().unwrap();

        // Mid-response underrun: no tail signal.
        assert!(timeout(Duration::from_millis(20), buf.tail_drained())
            .await
            .is_err());

        buf.push(frame(1));
        buf.finish();
        buf.pop_ready().unwrap();
        assert!(timeout(Duration::from_millis(20), buf.tail_drained())
            .await
            .is_ok());
    }

    // ── Drain task ────────────────────────────────────────────────

    struct RecordingSink {
        written: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn write(&mut self, frame: &AudioFrame) -> crate::error::Result<()> {
            self.written.lock().push(frame.seq());
            Ok(())
        }
    }

    #[tokio::test]
    async fn drain_writes_only_while_agent_speaking() {
        let buf = Arc::new(PlaybackBuffer::new(0));
        let written = Arc::new(Mutex::new(Vec::new()));
        let (state_tx, state_rx) = watch::channel(TurnState::Listening);
        let (fatal_tx, _fatal_rx) = mpsc::channel(1);
        let halt = CancellationToken::new();

        tokio::spawn(run_drain(
            Arc::clone(&buf),
            Box::new(RecordingSink {
                written: Arc::clone(&written),
            }),
            state_rx,
            halt.clone(),
            fatal_tx,
        ));

        buf.push(frame(0));
        buf.push(frame(1));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(written.lock().is_empty(), "paused while listening");

        state_tx.send_replace(TurnState::AgentSpeaking);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*written.lock(), vec![0, 1]);

        halt.cancel();
    }
}
