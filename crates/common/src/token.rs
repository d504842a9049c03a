//! # Pairing Token Generation
//!
//! Produces the single-use shared secret that lets an unconfigured
//! node and an operator device rendezvous without prior trust. The
//! token is the only thing protecting the pairing window, so it must
//! be unguessable for the (unbounded) duration of that window.
//!
//! ## Entropy
//!
//! 43 alphanumeric characters drawn from the OS CSPRNG, just over
//! 256 bits, comfortably above the 12-character floor the challenge
//! provider contract requires.
//!
//! Tokens are never persisted by this crate; they live for one
//! pairing session and are dropped afterwards.

use std::fmt;

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Token length in characters. log2(62^43) ≈ 256 bits.
pub const TOKEN_LEN: usize = 43;

/// Minimum acceptable token length. Anything shorter is treated as
/// "no token" by the challenge provider.
pub const TOKEN_MIN_LEN: usize = 12;

/// An opaque, high-entropy pairing token.
///
/// Scope: one pairing session. Generated when no pre-shared token is
/// configured, consumed once a peer responds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingToken(String);

impl PairingToken {
    /// Generate a fresh token from the OS entropy source.
    ///
    /// `OsRng` failure is unrecoverable by contract: a machine that
    /// cannot produce entropy cannot pair safely, and the process
    /// aborting at startup is the correct outcome.
    #[must_use]
    pub fn generate() -> Self {
        Self(Alphanumeric.sample_string(&mut OsRng, TOKEN_LEN))
    }

    /// Wrap a pre-shared token from configuration.
    pub fn from_existing(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The token string for transport/rendering.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this token meets the minimum entropy floor.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.0.len() >= TOKEN_MIN_LEN
    }
}

impl fmt::Display for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<PairingToken> for String {
    fn from(t: PairingToken) -> String {
        t.0
    }
}
