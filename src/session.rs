//! Session orchestrator: wires capture, playback, turn state, and actions.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ─▸ capture task ─▸ outbound pump ─▸ Transport ─▸ remote service
//!                                    ▴                │
//!                 action tasks ──────┘                ▼
//!                                            control loop (turn machine)
//!                                                     │
//!                              PlaybackBuffer ◂── audio deltas
//!                                    │
//!                               drain task ─▸ AudioSink
//! ```
//!
//! The session runs as four background tasks:
//! 1. **Capture**: reads device frames, forwards while the turn permits.
//! 2. **Outbound pump**: sole writer to the transport; capture and action
//!    results funnel through it, so nothing races a closed channel.
//! 3. **Control loop**: sole owner of turn transitions. Consumes inbound
//!    events, feeds the playback buffer, dispatches actions, runs the
//!    cancel-ack timer, and drives the shutdown sequence.
//! 4. **Drain**: pops buffered frames to the sink while the agent speaks.
//!
//! Shutdown (explicit stop or pipeline-fatal error) closes the transport
//! first, then halts the loops, in that order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionDispatcher, ActionRegistry};
use crate::audio::{AudioSink, AudioSource};
use crate::capture;
use crate::codec;
use crate::config::Config;
use crate::error::Error;
use crate::events::{SessionEvent, WireEvent};
use crate::playback::{self, PlaybackBuffer};
use crate::transport::Transport;
use crate::turn::{TurnEvent, TurnMachine, TurnState};

// ── Session ───────────────────────────────────────────────────────

/// Entry point for running one voice conversation.
pub struct Session;

impl Session {
    /// Start a session over an already-established transport.
    ///
    /// Spawns the background tasks and returns immediately; must be
    /// called within a tokio runtime. The transport is owned by the
    /// session from here on and closed during shutdown.
    pub fn start(
        config: Config,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
        transport: Arc<dyn Transport>,
        registry: ActionRegistry,
    ) -> SessionHandle {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (machine, state_rx) = TurnMachine::new();
        let stop = CancellationToken::new();
        let halt = CancellationToken::new();

        let (outbound_tx, outbound_rx) = mpsc::channel::<WireEvent>(256);
        let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);
        let (fatal_tx, fatal_rx) = mpsc::channel::<Error>(8);

        let prebuffer_frames = config.playback.prebuffer_frames(&config.audio);
        let playback = Arc::new(PlaybackBuffer::new(prebuffer_frames));

        let dispatcher = ActionDispatcher::new(
            registry,
            Duration::from_millis(config.actions.deadline_ms),
            outbound_tx.clone(),
            events_tx.clone(),
        );

        tracing::info!(
            session_id = %session_id,
            sample_rate = config.audio.sample_rate,
            frame_samples = config.audio.frame_samples,
            prebuffer_frames,
            vad_mode = ?config.capture.vad_mode,
            "starting voice session"
        );

        tokio::spawn(run_outbound(
            outbound_rx,
            Arc::clone(&transport),
            halt.clone(),
            fatal_tx.clone(),
        ));
        tokio::spawn(capture::run_capture(
            source,
            state_rx.clone(),
            outbound_tx.clone(),
            config.audio.clone(),
            config.capture.clone(),
            halt.clone(),
            fatal_tx.clone(),
        ));
        tokio::spawn(playback::run_drain(
            Arc::clone(&playback),
            sink,
            state_rx.clone(),
            halt.clone(),
            fatal_tx,
        ));

        let control = ControlLoop {
            machine,
            transport,
            playback,
            dispatcher,
            outbound_tx,
            events_tx,
            fatal_rx,
            stop: stop.clone(),
            halt: halt.clone(),
            cancel_deadline: None,
            cancel_ack_timeout: Duration::from_millis(config.turn.cancel_ack_timeout_ms),
            done_pending: false,
            rx_seq: 0,
            session_id: session_id.clone(),
        };
        tokio::spawn(control.run());

        SessionHandle {
            session_id,
            stop,
            halted: halt,
            state_rx,
            events_rx: Arc::new(Mutex::new(events_rx)),
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────

/// Control surface for a running session.
pub struct SessionHandle {
    session_id: String,
    stop: CancellationToken,
    halted: CancellationToken,
    state_rx: watch::Receiver<TurnState>,
    events_rx: Arc<Mutex<mpsc::Receiver<SessionEvent>>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Request shutdown. Idempotent: repeated calls produce no error and
    /// no duplicate shutdown side effects.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Current turn state.
    pub fn state(&self) -> TurnState {
        *self.state_rx.borrow()
    }

    /// Stream of turn-state changes for the hosting application.
    pub fn state_stream(&self) -> WatchStream<TurnState> {
        WatchStream::new(self.state_rx.clone())
    }

    /// Next session event (state changes, transcripts, action activity,
    /// termination). `None` once the session has ended and the queue is
    /// drained.
    pub async fn next_event(&self) -> Option<SessionEvent> {
        self.events_rx.lock().await.recv().await
    }

    /// Wait until the session has fully shut down.
    pub async fn closed(&self) {
        self.halted.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.halted.is_cancelled()
    }
}

// ── Outbound pump ─────────────────────────────────────────────────

/// Sole writer to the transport: preserves send order and guarantees
/// nothing writes after close.
async fn run_outbound(
    mut outbound_rx: mpsc::Receiver<WireEvent>,
    transport: Arc<dyn Transport>,
    halt: CancellationToken,
    fatal_tx: mpsc::Sender<Error>,
) {
    loop {
        let event = tokio::select! {
            _ = halt.cancelled() => break,
            ev = outbound_rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };
        if let Err(e) = transport.send(event).await {
            tracing::warn!(error = %e, "outbound send failed");
            let _ = fatal_tx.send(e).await;
            break;
        }
    }
    tracing::debug!("outbound pump stopped");
}

// ── Control loop ──────────────────────────────────────────────────

struct ControlLoop {
    machine: TurnMachine,
    transport: Arc<dyn Transport>,
    playback: Arc<PlaybackBuffer>,
    dispatcher: ActionDispatcher,
    outbound_tx: mpsc::Sender<WireEvent>,
    events_tx: mpsc::Sender<SessionEvent>,
    fatal_rx: mpsc::Receiver<Error>,
    stop: CancellationToken,
    halt: CancellationToken,
    /// Armed while in `Interrupted`, waiting for a cancel ack.
    cancel_deadline: Option<Instant>,
    cancel_ack_timeout: Duration,
    /// `response_audio_done` seen; waiting for the tail to drain.
    done_pending: bool,
    /// Arrival counter for inbound audio frames.
    rx_seq: u64,
    session_id: String,
}

impl ControlLoop {
    async fn run(mut self) {
        // Transport is up and tasks are running: the session is ready.
        self.transition(TurnEvent::SessionReady).await;

        let reason = loop {
            let deadline = self.cancel_deadline;
            tokio::select! {
                _ = self.stop.cancelled() => {
                    self.transition(TurnEvent::Fault).await;
                    break "stopped".to_string();
                }
                Some(err) = self.fatal_rx.recv() => {
                    tracing::error!(session_id = %self.session_id, error = %err, "pipeline-fatal error");
                    self.transition(TurnEvent::Fault).await;
                    break err.to_string();
                }
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.cancel_deadline = None;
                    tracing::debug!(session_id = %self.session_id, "cancel ack timed out, resuming");
                    self.transition(TurnEvent::CancelTimeout).await;
                }
                _ = self.playback.tail_drained() => {
                    if self.done_pending {
                        self.done_pending = false;
                        self.transition(TurnEvent::ResponseDone).await;
                    }
                }
                event = self.transport.recv() => match event {
                    Some(event) => {
                        if let Some(reason) = self.handle_event(event).await {
                            break reason;
                        }
                    }
                    None => {
                        self.transition(TurnEvent::Fault).await;
                        break Error::TransportClosed("inbound stream ended".into()).to_string();
                    }
                },
            }
        };

        // Shutdown sequence: close the channel, then halt the loops, in
        // that order — no orphaned writes to a closed channel.
        self.transport.close().await;
        self.halt.cancel();
        let _ = self.events_tx.try_send(SessionEvent::Ended {
            reason: reason.clone(),
        });
        tracing::info!(session_id = %self.session_id, reason = %reason, "session ended");
    }

    /// Apply one turn event through the single control point and carry
    /// out its side effects.
    async fn transition(&mut self, event: TurnEvent) {
        let Some(applied) = self.machine.apply(event) else {
            return;
        };
        let _ = self.events_tx.try_send(SessionEvent::State(applied.to));

        if applied.effects.clear_playback {
            // Local-first interrupt: buffered agent audio stops now, not
            // after a network round-trip.
            let discarded = self.playback.clear();
            self.done_pending = false;
            if discarded > 0 {
                tracing::info!(
                    session_id = %self.session_id,
                    discarded,
                    "playback buffer cleared"
                );
            }
        }
        if applied.effects.send_cancel {
            let _ = self.outbound_tx.send(WireEvent::ResponseCancel).await;
        }
        if applied.to == TurnState::Interrupted {
            self.cancel_deadline = Some(Instant::now() + self.cancel_ack_timeout);
        } else if applied.from == TurnState::Interrupted {
            self.cancel_deadline = None;
        }
    }

    /// Handle one inbound event. Returns a termination reason for fatal
    /// events, `None` otherwise.
    async fn handle_event(&mut self, event: WireEvent) -> Option<String> {
        match event {
            WireEvent::SpeechStarted => {
                self.transition(TurnEvent::SpeechStarted).await;
            }
            WireEvent::SpeechStopped => {
                self.transition(TurnEvent::SpeechStopped).await;
            }
            WireEvent::ResponseAudioDelta { audio } => {
                self.on_audio_delta(&audio).await;
            }
            WireEvent::ResponseAudioDone => {
                self.on_audio_done().await;
            }
            WireEvent::ResponseCancelled => {
                self.transition(TurnEvent::CancelAcknowledged).await;
            }
            WireEvent::InputTranscript { text } => {
                let _ = self.events_tx.try_send(SessionEvent::InputTranscript(text));
            }
            WireEvent::OutputTranscript { text } => {
                let _ = self
                    .events_tx
                    .try_send(SessionEvent::OutputTranscript(text));
            }
            WireEvent::ActionInvocation {
                id,
                name,
                arguments,
            } => {
                self.dispatcher.dispatch(id, name, arguments);
            }
            WireEvent::Error { code, message } => {
                tracing::error!(
                    session_id = %self.session_id,
                    code = %code,
                    error = %message,
                    "remote service error"
                );
                self.transition(TurnEvent::Fault).await;
                return Some(format!("remote error {code}: {message}"));
            }
            WireEvent::AudioChunk { .. }
            | WireEvent::BufferCommit
            | WireEvent::ResponseCancel
            | WireEvent::ActionResult { .. } => {
                tracing::debug!("ignoring outbound-only event on inbound stream");
            }
        }
        None
    }

    async fn on_audio_delta(&mut self, audio: &str) {
        let frame = match codec::decode(audio, self.rx_seq) {
            Ok(frame) => frame,
            Err(e) => {
                // Contained: drop the frame, keep the stream alive.
                tracing::warn!(error = %e, "dropping malformed audio delta");
                return;
            }
        };
        match self.machine.state() {
            TurnState::AwaitingResponse => {
                self.transition(TurnEvent::FirstResponseDelta).await;
            }
            TurnState::AgentSpeaking => {}
            other => {
                // Stale tail of a cancelled or completed response.
                tracing::debug!(state = other.as_str(), "discarding response audio");
                return;
            }
        }
        self.rx_seq += 1;
        self.playback.push(frame);
    }

    async fn on_audio_done(&mut self) {
        if self.machine.state() != TurnState::AgentSpeaking {
            tracing::debug!(
                state = self.machine.state().as_str(),
                "ignoring response_audio_done"
            );
            return;
        }
        // Let the buffered tail play out; the drain reports back when it
        // is through and the machine returns to listening.
        self.done_pending = true;
        self.playback.finish();
    }
}
