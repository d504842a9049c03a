//! # Pairing Protocol Engine
//!
//! Bridges an unconfigured node to a trusted operator device without
//! prior network identity. The node renders a single-use token for
//! out-of-band transfer (a scannable code on the console), then waits
//! on the rendezvous channel for a peer that knows the same token to
//! send the provisioning document.
//!
//! ## Concurrency
//!
//! One blocking receive raced against a cooperative cancellation
//! signal (operator keystroke). Receipt and cancellation may resolve
//! in the same instant; the race is biased toward receipt so a
//! document that arrived just before the keystroke is never dropped.
//!
//! There is no built-in timeout: with a token supplied and no peer
//! responding, the wait lasts until explicit cancellation. Callers
//! may wrap the future with their own deadline.
//!
//! ## Outcomes
//!
//! Four caller-distinguishable results, deliberately kept apart:
//! - `Ok(PairOutcome::Paired(_))`: a non-empty document arrived;
//! - `Ok(PairOutcome::Cancelled)`: the operator aborted; not an error;
//! - `Err(PairError::NoConfiguration)`: a peer answered with an
//!   empty mapping;
//! - `Err(PairError::Channel(_))`: the rendezvous transport failed.
//!
//! The engine holds no state after returning; pairing is strictly
//! single-use per invocation.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use meshboot_common::PairingToken;

// ════════════════════════════════════════════════════════════════════════════
// ERRORS AND OUTCOMES
// ════════════════════════════════════════════════════════════════════════════

/// Failure reported by the rendezvous transport.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ChannelError(pub String);

/// Pairing failures. Cancellation is not among them; it is a normal
/// outcome, see [`PairOutcome::Cancelled`].
#[derive(Debug, Error)]
pub enum PairError {
    /// A peer responded with an empty mapping.
    #[error("no configuration received, stopping pairing")]
    NoConfiguration,

    /// The rendezvous transport failed.
    #[error("pairing channel failure: {0}")]
    Channel(#[from] ChannelError),
}

/// How a pairing session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// A peer that knew the token sent this configuration mapping.
    Paired(HashMap<String, String>),
    /// The operator aborted the wait.
    Cancelled,
}

// ════════════════════════════════════════════════════════════════════════════
// BOUNDARY TRAITS
// ════════════════════════════════════════════════════════════════════════════

/// The rendezvous session, keyed by a token. Implemented by the mesh
/// transport; blocks until a peer holding the same token announces a
/// configuration mapping.
#[async_trait]
pub trait PairingChannel: Send + Sync {
    async fn receive(&self, token: &PairingToken)
        -> Result<HashMap<String, String>, ChannelError>;
}

/// The out-of-band presentation surface (typically the console).
///
/// `release` is the guaranteed trailing step: the engine calls it on
/// every exit path (success, error, or cancellation) so an
/// exclusively-held console is always handed back.
pub trait PairingScreen: Send + Sync {
    /// Render the token and operator guidance.
    fn present(&self, token: &PairingToken);

    /// Hand the presentation surface back to the system.
    fn release(&self);
}

// ════════════════════════════════════════════════════════════════════════════
// ENGINE
// ════════════════════════════════════════════════════════════════════════════

/// Single-use pairing engine over a channel and a screen.
pub struct PairingEngine<'a> {
    channel: &'a dyn PairingChannel,
    screen: &'a dyn PairingScreen,
}

impl<'a> PairingEngine<'a> {
    pub fn new(channel: &'a dyn PairingChannel, screen: &'a dyn PairingScreen) -> Self {
        Self { channel, screen }
    }

    /// Run one pairing session.
    ///
    /// Uses `existing` when supplied (pre-shared via configuration),
    /// otherwise generates a fresh token. Waits until a peer responds
    /// or `cancel` fires, whichever comes first; receipt wins ties.
    pub async fn pair(
        &self,
        existing: Option<PairingToken>,
        cancel: &CancellationToken,
    ) -> Result<PairOutcome, PairError> {
        let token = existing.unwrap_or_else(PairingToken::generate);
        self.screen.present(&token);
        info!("pairing session open, waiting for a peer");

        // Biased: when receipt and cancellation are both ready, the
        // received document must not be silently dropped.
        let result = tokio::select! {
            biased;
            received = self.channel.receive(&token) => match received {
                Ok(mapping) if mapping.is_empty() => Err(PairError::NoConfiguration),
                Ok(mapping) => Ok(PairOutcome::Paired(mapping)),
                Err(err) => Err(PairError::Channel(err)),
            },
            () = cancel.cancelled() => Ok(PairOutcome::Cancelled),
        };

        // Trailing step on every exit path: give the console back.
        self.screen.release();
        result
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
