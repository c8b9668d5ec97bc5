//! Transport channel: a persistent, ordered, bidirectional event stream.
//!
//! The engine only requires three operations — send an event, receive the
//! next inbound event, close — so the channel is a capability trait. The
//! production implementation is [`ws::WsTransport`]; tests substitute
//! in-memory channel pairs.

use async_trait::async_trait;

use crate::error::Result;
use crate::events::WireEvent;

pub mod ws;

pub use ws::WsTransport;

/// Persistent bidirectional message channel to the remote service.
///
/// Ordering: sends are delivered in call order; `recv` yields inbound
/// events in network arrival order. No ordering holds across directions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one event to the remote peer.
    ///
    /// Fails with [`crate::error::Error::TransportClosed`] once the
    /// channel is closed or the network has failed.
    async fn send(&self, event: WireEvent) -> Result<()>;

    /// Receive the next inbound event. `None` means the channel closed
    /// (peer close, network fault, or local [`Transport::close`]).
    async fn recv(&self) -> Option<WireEvent>;

    /// Close the channel. Idempotent.
    async fn close(&self);
}
