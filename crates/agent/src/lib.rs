//! # Meshboot Agent
//!
//! Coordinates unattended nodes joining a self-forming cluster
//! without a central control plane. Two concerns live here:
//!
//! - **Bootstrap pairing** ([`pairing`]): a freshly booted,
//!   unconfigured node obtains its provisioning document from an
//!   operator's trusted device over an out-of-band channel, keyed by
//!   a single-use high-entropy token.
//! - **Role coordination** ([`role`]): installed nodes agree, without
//!   a central coordinator, on which of them runs the control plane,
//!   publish join credentials through a shared eventually-consistent
//!   ledger, and stay idempotent across reboots via a local sentinel.
//!
//! ## Boundaries
//!
//! External capabilities are consumed through narrow traits, each
//! with a fake implementation beside it for testing:
//!
//! | Boundary | Trait | External collaborator |
//! |----------|-------|-----------------------|
//! | Distributed ledger | [`ledger::LedgerClient`] | mesh transport's replicated KV |
//! | Rendezvous channel | [`pairing::PairingChannel`] | mesh transport's pairing session |
//! | OS services | [`service::ServiceManager`] | init system (systemd) |
//! | Join credentials | [`credentials::CredentialSource`] | cluster distribution files |
//! | Overlay address | [`network::OverlayNetwork`] | mesh transport's virtual interface |
//! | Imaging tool | [`install::Installer`] | on-disk installer |
//!
//! The ledger's gossip internals, the transport's peer discovery, and
//! the installer's partitioning logic are all out of scope; the agent
//! only decides *when* and *with what data* those collaborators run.

pub mod bus;
pub mod credentials;
pub mod install;
pub mod ledger;
pub mod network;
pub mod pairing;
pub mod role;
pub mod sentinel;
pub mod service;
pub mod transport;

pub use bus::{AgentEvent, BusError, EventBus, EventResponse};
pub use install::{InstallError, InstallRequest, Installer};
pub use ledger::{LedgerClient, MemoryLedger};
pub use pairing::{PairError, PairOutcome, PairingChannel, PairingEngine, PairingScreen};
pub use role::{RoleCoordinator, RoleDirective, RoleError};
pub use sentinel::SentinelStore;
pub use service::{ServiceError, ServiceManager};
