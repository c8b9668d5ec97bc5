//! Action registry and dispatcher.
//!
//! The remote service can request local side-effecting actions
//! mid-conversation (device control, lookups, …). The concrete action
//! set is a capability interface: hosts register name → handler pairs
//! before the session starts, and the registry is read-only at runtime.
//!
//! The dispatcher never blocks the audio pipeline: each invocation runs
//! on its own task, raced against the configured deadline. Unknown
//! names, handler errors, and timeouts are all reported as
//! `action_result` error payloads — never fatal to the session. Handlers
//! must not assume ordering relative to concurrently invoked actions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::{SessionEvent, WireEvent};

pub mod clock;

pub use clock::ClockAction;

// ── Handler trait ─────────────────────────────────────────────────

/// One invocable action. Handlers may be synchronous-fast or
/// long-running; the dispatcher offloads them either way.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Registry key the remote service invokes this handler by.
    fn name(&self) -> &str;

    /// Execute with the invocation's structured arguments.
    async fn invoke(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

// ── Registry ──────────────────────────────────────────────────────

/// Name → handler mapping, supplied wholesale at session construction
/// and immutable thereafter.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name. Last write wins.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ── Dispatcher ────────────────────────────────────────────────────

/// Maps remote invocations to registered handlers and returns results
/// to the outbound channel.
pub struct ActionDispatcher {
    registry: Arc<ActionRegistry>,
    deadline: Duration,
    outbound_tx: mpsc::Sender<WireEvent>,
    events_tx: mpsc::Sender<SessionEvent>,
}

impl ActionDispatcher {
    pub fn new(
        registry: ActionRegistry,
        deadline: Duration,
        outbound_tx: mpsc::Sender<WireEvent>,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            deadline,
            outbound_tx,
            events_tx,
        }
    }

    /// Handle one `action_invocation` without blocking the caller.
    ///
    /// The handler future is dropped at the deadline, so a late
    /// completion is discarded rather than reported.
    pub fn dispatch(&self, id: String, name: String, arguments: serde_json::Value) {
        let outbound_tx = self.outbound_tx.clone();
        let events_tx = self.events_tx.clone();

        let Some(handler) = self.registry.get(&name) else {
            tracing::warn!(id = %id, name = %name, "invocation for unregistered action");
            tokio::spawn(async move {
                let _ = outbound_tx
                    .send(WireEvent::ActionResult {
                        id,
                        payload: serde_json::json!({"error": "unknown action"}),
                    })
                    .await;
            });
            return;
        };

        let deadline = self.deadline;
        tokio::spawn(async move {
            tracing::info!(id = %id, name = %name, "executing action");
            let _ = events_tx.try_send(SessionEvent::ActionStarted {
                id: id.clone(),
                name: name.clone(),
            });

            let payload = match tokio::time::timeout(deadline, handler.invoke(arguments)).await {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    tracing::warn!(id = %id, name = %name, error = %e, "action failed");
                    serde_json::json!({"error": e.to_string()})
                }
                Err(_) => {
                    tracing::warn!(
                        id = %id,
                        name = %name,
                        deadline_ms = deadline.as_millis() as u64,
                        "action deadline elapsed, discarding handler"
                    );
                    serde_json::json!({"error": "timeout"})
                }
            };

            let _ = events_tx.try_send(SessionEvent::ActionFinished { id: id.clone() });
            let _ = outbound_tx
                .send(WireEvent::ActionResult { id, payload })
                .await;
        });
    }
}

// ── Tests ──────────────────────────────────────────────────────────
