//! Configuration error taxonomy.
//!
//! Precondition failures (`MissingDocument`, `MissingDevice`) are
//! fatal by design: they mean the operator never supplied the data an
//! install needs, and retrying cannot fix that. Unreadable files and
//! directories are not errors at this level; document scanning skips
//! them and keeps looking.

use thiserror::Error;

/// Errors produced while loading or validating the provisioning
/// configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration document was found or supplied at all.
    #[error("no provisioning document available")]
    MissingDocument,

    /// A document exists but names no install target device.
    #[error("provisioning document does not specify a target device")]
    MissingDevice,

    /// The document could not be parsed as YAML.
    #[error("failed to parse provisioning document: {0}")]
    Parse(#[from] serde_yaml::Error),
}
