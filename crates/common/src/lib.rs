//! # Meshboot Common Crate
//!
//! Shared types for the meshboot bootstrap agent: the provisioning
//! configuration document exchanged during pairing, the node role
//! vocabulary, the pairing token generator, and the configuration
//! error taxonomy.
//!
//! ## Modules
//! - `config`: provisioning document + env/args merge policy
//! - `token`: high-entropy pairing token generation
//! - `error`: configuration error types
//!
//! Everything here is deliberately free of I/O beyond plain file
//! reads in [`config::ProvisionConfig::scan`]; the networked and
//! OS-facing boundaries live in `meshboot-agent`.

pub mod config;
pub mod error;
pub mod token;

pub use config::{ClusterConfig, NodeRole, NodeSection, ProvisionConfig};
pub use error::ConfigError;
pub use token::PairingToken;
