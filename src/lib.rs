//! ClawVoice: a real-time, full-duplex voice-conversation engine.
//!
//! Captures audio from a local input device, streams it to a remote
//! speech-to-speech service over a persistent bidirectional channel,
//! plays the synthesized reply continuously, and tracks conversational
//! turn state — including barge-in that silences local playback the
//! instant the user starts talking over the agent.
//!
//! ## Design
//! - Sum-type wire protocol with exhaustive matching (`WireEvent`)
//! - Single control point for turn transitions; capture and playback
//!   observe the state through a watch channel
//! - Explicit queues between the receive and playback activities — no
//!   callback reentrancy during barge-in
//! - Capability traits at every seam: `AudioSource`/`AudioSink`,
//!   `Transport`, `ActionHandler` — all swappable in tests
//! - Pluggable action registry for remote-triggered local side effects
//! - Every policy value (energy gate, silence commit, pre-buffer depth,
//!   action deadline) is configuration, not a constant

pub mod actions;
pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod session;
pub mod transport;
pub mod turn;

mod capture;

pub use actions::{ActionHandler, ActionRegistry, ClockAction};
pub use audio::{AudioFrame, AudioSink, AudioSource};
pub use config::{Config, VadMode};
pub use error::{Error, Result};
pub use events::{SessionEvent, WireEvent};
pub use session::{Session, SessionHandle};
pub use transport::{Transport, WsTransport};
pub use turn::TurnState;
