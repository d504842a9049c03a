//! # Agent Event Bus
//!
//! A small in-process dispatcher connecting agent lifecycle events to
//! pluggable handlers. The bus is an explicitly constructed value
//! passed to whoever needs it; there is no global registry.
//!
//! Dispatch is fail-closed: a handler that reports an error makes the
//! whole `emit` fail. A provisioning step that half-ran is worse than
//! one that visibly stopped, so callers treat [`BusError::Provider`]
//! as fatal to the process.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use meshboot_common::{PairingToken, ProvisionConfig};

// ════════════════════════════════════════════════════════════════════════════
// EVENTS AND RESPONSES
// ════════════════════════════════════════════════════════════════════════════

/// Lifecycle events the agent emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentEvent {
    /// A peer asks which token this node is pairing under. Payload is
    /// the YAML configuration document (possibly empty).
    Challenge,
    /// An install is about to run. Payload is the install options.
    Install,
    /// The node finished bootstrap.
    Bootstrap,
}

impl AgentEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentEvent::Challenge => "challenge",
            AgentEvent::Install => "install",
            AgentEvent::Bootstrap => "bootstrap",
        }
    }
}

/// What a handler returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventResponse {
    /// Handler output consumed by the emitter.
    pub data: String,
    /// Non-empty on handler failure.
    pub error: String,
    /// Optional progress note, surfaced through logging.
    pub state: String,
}

impl EventResponse {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn errored(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }

    pub fn is_err(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Dispatch failures.
#[derive(Debug, Error)]
pub enum BusError {
    /// A handler reported an error. Fail-closed; the emitter must not
    /// continue as if the event succeeded.
    #[error("handler for `{event}` failed: {error}")]
    Provider { event: &'static str, error: String },
}

// ════════════════════════════════════════════════════════════════════════════
// BUS
// ════════════════════════════════════════════════════════════════════════════

type Handler = Box<dyn Fn(&str) -> EventResponse + Send + Sync>;

/// In-process event dispatcher.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<AgentEvent, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with the built-in handlers registered.
    pub fn initialized() -> Self {
        let bus = Self::new();
        bus.subscribe(AgentEvent::Challenge, |payload| challenge(payload));
        bus
    }

    /// Register `handler` for `event`. Multiple handlers per event
    /// run in registration order.
    pub fn subscribe<F>(&self, event: AgentEvent, handler: F)
    where
        F: Fn(&str) -> EventResponse + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event)
            .or_default()
            .push(Box::new(handler));
    }

    /// Dispatch `event` to every registered handler.
    ///
    /// Returns all responses on success. The first errored response
    /// aborts the dispatch; non-empty `state` fields are logged as
    /// progress along the way.
    pub fn emit(&self, event: AgentEvent, payload: &str) -> Result<Vec<EventResponse>, BusError> {
        let handlers = self.handlers.read();
        let Some(registered) = handlers.get(&event) else {
            return Ok(Vec::new());
        };

        let mut responses = Vec::with_capacity(registered.len());
        for handler in registered {
            let response = handler(payload);
            if !response.state.is_empty() {
                info!(event = event.as_str(), state = %response.state, "handler progress");
            }
            if response.is_err() {
                return Err(BusError::Provider {
                    event: event.as_str(),
                    error: response.error,
                });
            }
            responses.push(response);
        }
        Ok(responses)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// BUILT-IN HANDLERS
// ════════════════════════════════════════════════════════════════════════════

/// Challenge handler: answer with the pairing token this node listens
/// under.
///
/// The payload is the node's configuration document; a pre-shared
/// `network_token` is returned verbatim, otherwise a fresh token is
/// generated for this session.
fn challenge(payload: &str) -> EventResponse {
    let token = ProvisionConfig::from_yaml(payload)
        .ok()
        .and_then(|cfg| cfg.network_token().map(str::to_string))
        .unwrap_or_else(|| PairingToken::generate().as_str().to_string());
    EventResponse::data(token)
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    // ──────────────────────────────────────────────────────────────────────
    // CHALLENGE
    // ──────────────────────────────────────────────────────────────────────

    #[test]
    fn test_challenge_returns_configured_token_verbatim() {
        let bus = EventBus::initialized();
        let payload = "node:\n  network_token: foo\n";
        let responses = bus.emit(AgentEvent::Challenge, payload).expect("emit");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].data, "foo");
    }

    #[test]
    fn test_challenge_generates_token_when_unconfigured() {
        let bus = EventBus::initialized();
        let responses = bus.emit(AgentEvent::Challenge, "").expect("emit");
        assert!(responses[0].data.len() > 12);
    }

    #[test]
    fn test_challenge_generates_on_unparseable_payload() {
        let bus = EventBus::initialized();
        let responses = bus
            .emit(AgentEvent::Challenge, ":::not yaml")
            .expect("emit");
        assert!(responses[0].data.len() > 12);
    }

    // ──────────────────────────────────────────────────────────────────────
    // DISPATCH
    // ──────────────────────────────────────────────────────────────────────

    #[test]
    fn test_emit_without_handlers_is_empty() {
        let bus = EventBus::new();
        let responses = bus.emit(AgentEvent::Bootstrap, "").expect("emit");
        assert!(responses.is_empty());
    }

    #[test]
    fn test_handler_error_fails_closed() {
        let bus = EventBus::new();
        bus.subscribe(AgentEvent::Install, |_| EventResponse::data("ok"));
        bus.subscribe(AgentEvent::Install, |_| {
            EventResponse::errored("device locked")
        });

        let err = bus.emit(AgentEvent::Install, "{}").unwrap_err();
        let BusError::Provider { event, error } = err;
        assert_eq!(event, "install");
        assert_eq!(error, "device locked");
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        bus.subscribe(AgentEvent::Bootstrap, |_| EventResponse::data("first"));
        bus.subscribe(AgentEvent::Bootstrap, |_| EventResponse::data("second"));

        let responses = bus.emit(AgentEvent::Bootstrap, "").expect("emit");
        let data: Vec<&str> = responses.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(data, vec!["first", "second"]);
    }
}
