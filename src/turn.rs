//! Turn-state machine: arbitrates listening vs. speaking vs. idle.
//!
//! The single most important correctness property of the engine lives
//! here: barge-in must be real, not cosmetic. The instant the user starts
//! speaking during agent playback, locally buffered agent audio stops —
//! the transport-level cancel is advisory for the remote side's
//! generation, never a precondition for local silence.
//!
//! Transitions are applied through one control point (the session control
//! loop) even though capture and playback run concurrently, which
//! eliminates races between "start speaking" and "stop speaking" signals.
//! [`TurnMachine::apply`] is a pure table: state + event → new state +
//! side effects for the control loop to carry out.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// ── Turn state ────────────────────────────────────────────────────

/// Conversational turn state. Exactly one value is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No session running.
    Idle,
    /// Session up, waiting for the user to speak.
    Listening,
    /// Remote VAD reports the user is speaking.
    UserSpeaking,
    /// User finished; waiting for the first response frame.
    AwaitingResponse,
    /// Synthesized speech is playing.
    AgentSpeaking,
    /// User barged in; local playback is silenced, cancel in flight.
    Interrupted,
}

impl TurnState {
    /// Whether the capture loop may forward audio to the transport.
    pub fn capture_enabled(self) -> bool {
        matches!(self, Self::Listening | Self::UserSpeaking)
    }

    /// Whether the playback drain may write to the audio sink.
    pub fn playback_enabled(self) -> bool {
        matches!(self, Self::AgentSpeaking)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::UserSpeaking => "user_speaking",
            Self::AwaitingResponse => "awaiting_response",
            Self::AgentSpeaking => "agent_speaking",
            Self::Interrupted => "interrupted",
        }
    }
}

// ── Turn events ───────────────────────────────────────────────────

/// Lifecycle inputs that can move the turn machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// Transport established, session configured.
    SessionReady,
    /// Remote VAD: user started speaking.
    SpeechStarted,
    /// Remote VAD: user stopped speaking.
    SpeechStopped,
    /// First audio delta of a response arrived.
    FirstResponseDelta,
    /// Response audio complete and the playback tail has drained.
    ResponseDone,
    /// Remote acknowledged the barge-in cancel.
    CancelAcknowledged,
    /// No cancel acknowledgement within the configured window.
    CancelTimeout,
    /// Terminal error (capture, transport, or remote error event).
    Fault,
}

// ── Side effects ──────────────────────────────────────────────────

/// What the control loop must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideEffects {
    /// Atomically clear the playback buffer and pause the drain.
    pub clear_playback: bool,
    /// Send an advisory `response_cancel` to the remote service.
    pub send_cancel: bool,
    /// Stop all I/O and unwind the session.
    pub fatal: bool,
}

/// A transition that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub from: TurnState,
    pub to: TurnState,
    pub effects: SideEffects,
}

// ── Machine ───────────────────────────────────────────────────────

/// Owner of the live [`TurnState`], publishing changes on a watch channel.
pub struct TurnMachine {
    state: TurnState,
    tx: watch::Sender<TurnState>,
}

impl TurnMachine {
    /// Create a machine in `Idle` plus a receiver for state observers
    /// (capture gate, playback gate, hosting application).
    pub fn new() -> (Self, watch::Receiver<TurnState>) {
        let (tx, rx) = watch::channel(TurnState::Idle);
        (
            Self {
                state: TurnState::Idle,
                tx,
            },
            rx,
        )
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Apply one lifecycle event.
    ///
    /// Returns `None` when the event does not apply in the current state
    /// (e.g. a stale `speech_stopped` while idle); the machine is
    /// unchanged in that case.
    pub fn apply(&mut self, event: TurnEvent) -> Option<Applied> {
        use TurnEvent as E;
        use TurnState as S;

        let (to, effects) = match (self.state, event) {
            (S::Idle, E::SessionReady) => (S::Listening, SideEffects::default()),
            (S::Listening, E::SpeechStarted) => (S::UserSpeaking, SideEffects::default()),
            (S::UserSpeaking, E::SpeechStopped) => (S::AwaitingResponse, SideEffects::default()),
            (S::AwaitingResponse, E::FirstResponseDelta) => {
                (S::AgentSpeaking, SideEffects::default())
            }
            (S::AgentSpeaking, E::ResponseDone) => (S::Listening, SideEffects::default()),
            // Barge-in: silence locally first, then advise the remote.
            (S::AgentSpeaking, E::SpeechStarted) => (
                S::Interrupted,
                SideEffects {
                    clear_playback: true,
                    send_cancel: true,
                    fatal: false,
                },
            ),
            (S::Interrupted, E::CancelAcknowledged | E::CancelTimeout) => {
                (S::UserSpeaking, SideEffects::default())
            }
            (_, E::Fault) => (
                S::Idle,
                SideEffects {
                    clear_playback: true,
                    send_cancel: false,
                    fatal: true,
                },
            ),
            _ => return None,
        };

        let from = self.state;
        self.state = to;
        self.tx.send_replace(to);
        tracing::debug!(from = from.as_str(), to = to.as_str(), "turn transition");
        Some(Applied { from, to, effects })
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(state: TurnState) -> TurnMachine {
        let (mut m, _rx) = TurnMachine::new();
        // Walk the table to reach the requested state.
        let path: &[TurnEvent] = match state {
            TurnState::Idle => &[],
            TurnState::Listening => &[TurnEvent::SessionReady],
            TurnState::UserSpeaking => &[TurnEvent::SessionReady, TurnEvent::SpeechStarted],
            TurnState::AwaitingResponse => &[
                TurnEvent::SessionReady,
                TurnEvent::SpeechStarted,
                TurnEvent::SpeechStopped,
            ],
            TurnState::AgentSpeaking => &[
                TurnEvent::SessionReady,
                TurnEvent::SpeechStarted,
                TurnEvent::SpeechStopped,
                TurnEvent::FirstResponseDelta,
            ],
            TurnState::Interrupted => &[
                TurnEvent::SessionReady,
                TurnEvent::SpeechStarted,
                TurnEvent::SpeechStopped,
                TurnEvent::FirstResponseDelta,
                TurnEvent::SpeechStarted,
            ],
        };
        for ev in path {
            m.apply(*ev).expect("path transition must apply");
        }
        assert_eq!(m.state(), state);
        m
    }

    #[test]
    fn full_turn_cycle() {
        let (mut m, rx) = TurnMachine::new();
        assert_eq!(m.state(), TurnState::Idle);

        m.apply(TurnEvent::SessionReady).unwrap();
        assert_eq!(m.state(), TurnState::Listening);
        m.apply(TurnEvent::SpeechStarted).unwrap();
        m.apply(TurnEvent::SpeechStopped).unwrap();
        m.apply(TurnEvent::FirstResponseDelta).unwrap();
        assert_eq!(m.state(), TurnState::AgentSpeaking);
        m.apply(TurnEvent::ResponseDone).unwrap();
        assert_eq!(m.state(), TurnState::Listening);
        assert_eq!(*rx.borrow(), TurnState::Listening);
    }

    #[test]
    fn barge_in_clears_playback_and_sends_cancel() {
        let mut m = machine_in(TurnState::AgentSpeaking);
        let applied = m.apply(TurnEvent::SpeechStarted).unwrap();
        assert_eq!(applied.to, TurnState::Interrupted);
        assert!(applied.effects.clear_playback);
        assert!(applied.effects.send_cancel);
        assert!(!applied.effects.fatal);
    }

    #[test]
    fn interrupted_resumes_on_ack_or_timeout() {
        let mut m = machine_in(TurnState::Interrupted);
        assert_eq!(
            m.apply(TurnEvent::CancelAcknowledged).unwrap().to,
            TurnState::UserSpeaking
        );

        let mut m = machine_in(TurnState::Interrupted);
        assert_eq!(
            m.apply(TurnEvent::CancelTimeout).unwrap().to,
            TurnState::UserSpeaking
        );
    }

    #[test]
    fn fault_from_any_state_is_fatal() {
        for state in [
            TurnState::Idle,
            TurnState::Listening,
            TurnState::UserSpeaking,
            TurnState::AwaitingResponse,
            TurnState::AgentSpeaking,
            TurnState::Interrupted,
        ] {
            let mut m = machine_in(state);
            let applied = m.apply(TurnEvent::Fault).unwrap();
            assert_eq!(applied.to, TurnState::Idle);
            assert!(applied.effects.fatal);
        }
    }

    #[test]
    fn inapplicable_events_are_ignored() {
        let mut m = machine_in(TurnState::Listening);
        assert!(m.apply(TurnEvent::SpeechStopped).is_none());
        assert!(m.apply(TurnEvent::ResponseDone).is_none());
        assert_eq!(m.state(), TurnState::Listening);

        // A delta before the user ever spoke does not start playback.
        let mut m = machine_in(TurnState::Listening);
        assert!(m.apply(TurnEvent::FirstResponseDelta).is_none());
    }

    #[test]
    fn capture_and_playback_gates() {
        assert!(TurnState::Listening.capture_enabled());
        assert!(TurnState::UserSpeaking.capture_enabled());
        assert!(!TurnState::AwaitingResponse.capture_enabled());
        assert!(!TurnState::AgentSpeaking.capture_enabled());
        assert!(!TurnState::Interrupted.capture_enabled());

        assert!(TurnState::AgentSpeaking.playback_enabled());
        assert!(!TurnState::Interrupted.playback_enabled());
        assert!(!TurnState::Listening.playback_enabled());
    }
}
