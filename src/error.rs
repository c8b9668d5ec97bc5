//! Error taxonomy for the voice engine.
//!
//! Two families of failures with very different blast radii:
//!
//! - **Pipeline-fatal** ([`Error::CaptureFailure`], [`Error::PlaybackFailure`],
//!   [`Error::TransportClosed`]) unwind the whole session through the
//!   orchestrator's shutdown sequence. Device failures are not treated as
//!   transient; there is no automatic retry or reconnect.
//! - **Per-event** ([`Error::MalformedPayload`], [`Error::UnknownAction`],
//!   [`Error::ActionTimeout`], [`Error::ActionError`]) are contained: the
//!   offending unit is dropped or reported as an error payload, and the
//!   conversation continues.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All the ways the voice engine can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// The input device reported a hardware error. Fatal to the session.
    #[error("audio capture failure: {0}")]
    CaptureFailure(String),

    /// The output device reported a hardware error. Fatal to the session.
    #[error("audio playback failure: {0}")]
    PlaybackFailure(String),

    /// An inbound payload could not be decoded. The unit is dropped and
    /// the stream continues.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The peer closed the channel or the network failed. Fatal to the
    /// session; surfaced upward, never silently reconnected.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// An action handler did not complete before its deadline.
    #[error("action '{name}' timed out after {deadline_ms}ms")]
    ActionTimeout { name: String, deadline_ms: u64 },

    /// An action handler returned an error.
    #[error("action '{name}' failed: {message}")]
    ActionError { name: String, message: String },

    /// A remote invocation named an action with no registered handler.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error terminates the session (as opposed to being
    /// contained to one event or invocation).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CaptureFailure(_) | Self::PlaybackFailure(_) | Self::TransportClosed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(Error::CaptureFailure("dead mic".into()).is_fatal());
        assert!(Error::TransportClosed("peer gone".into()).is_fatal());
        assert!(!Error::MalformedPayload("bad base64".into()).is_fatal());
        assert!(!Error::UnknownAction("foo".into()).is_fatal());
        assert!(!Error::ActionTimeout {
            name: "slow".into(),
            deadline_ms: 10
        }
        .is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let e = Error::ActionTimeout {
            name: "get_weather".into(),
            deadline_ms: 5000,
        };
        assert_eq!(e.to_string(), "action 'get_weather' timed out after 5000ms");
    }
}
