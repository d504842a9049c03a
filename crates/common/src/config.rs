//! # Provisioning Configuration Document
//!
//! The document exchanged during pairing or loaded from durable
//! configuration. It is the single source of truth for what an
//! unconfigured node should become: which disk to install to, which
//! role it is forced into (if any), and how the cluster service is
//! parameterized.
//!
//! ## Shape
//!
//! ```yaml
//! node:
//!   device: /dev/sda
//!   network_token: "..."     # optional pre-shared pairing token
//!   role: worker             # optional forced role
//!   offline: false
//!   reboot: true
//!   poweroff: false
//! cluster:
//!   enabled: true
//!   env:
//!     CLUSTER_LOG: debug
//!   args: ["--disable=traefik"]
//!   replace_env: false
//!   replace_args: false
//! ```
//!
//! ## Merge policy
//!
//! The `replace_env` / `replace_args` flags control whether operator
//! values override or extend compiled defaults; see
//! [`ClusterConfig::effective_env`] and [`ClusterConfig::effective_args`].
//!
//! The untyped `string -> string` pairing payload is converted into
//! this strongly-typed document at exactly one place
//! (`ProvisionConfig::from_yaml`); nothing downstream touches the raw
//! map.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ════════════════════════════════════════════════════════════════════════════
// NODE ROLE
// ════════════════════════════════════════════════════════════════════════════

/// A node's cluster role as recorded in the shared ledger.
///
/// Role *uniqueness* (e.g. exactly one master) is a policy enforced by
/// election logic and operators, never by the storage layer. Readers
/// must validate, not assume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Control-plane node. Publishes join credentials to the ledger.
    Master,
    /// Worker node. Joins using credentials published by a master.
    Worker,
}

impl NodeRole {
    /// Stable string tag used as the ledger value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
        }
    }

    /// Parse from a string tag. Case-insensitive.
    #[must_use]
    pub fn from_str_tag(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "master" => Some(NodeRole::Master),
            "worker" => Some(NodeRole::Worker),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// DOCUMENT SECTIONS
// ════════════════════════════════════════════════════════════════════════════

/// The `node:` section: install target and bootstrap identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Install target device (e.g. `/dev/sda`). Required before any
    /// install action; absence is a fatal precondition failure.
    pub device: String,

    /// Optional pre-shared pairing token. When set, pairing skips
    /// token generation and listens on this token instead.
    pub network_token: String,

    /// Forced role. When set, the coordinator publishes it on every
    /// attempt, before any election logic runs.
    pub role: Option<NodeRole>,

    /// Install without pairing (configuration already on disk).
    pub offline: bool,

    /// Reboot after a completed install.
    pub reboot: bool,

    /// Power off after a completed install.
    pub poweroff: bool,
}

/// The `cluster:` section: distribution-specific service settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Whether operator-supplied cluster settings apply at all.
    pub enabled: bool,

    /// Environment variable overrides for the cluster service.
    pub env: HashMap<String, String>,

    /// Argument overrides for the cluster service.
    pub args: Vec<String>,

    /// When true, `env` fully replaces the defaults instead of
    /// layering over them.
    pub replace_env: bool,

    /// When true, `args` fully replaces the defaults instead of
    /// being appended after them.
    pub replace_args: bool,
}

impl ClusterConfig {
    /// Merge the configured environment over `defaults`.
    ///
    /// - `replace_env == true`: the operator map wins wholesale.
    /// - otherwise: defaults first, operator values layered on top
    ///   (operator wins per key).
    #[must_use]
    pub fn effective_env(&self, defaults: &HashMap<String, String>) -> HashMap<String, String> {
        if self.replace_env {
            return self.env.clone();
        }
        let mut merged = defaults.clone();
        for (k, v) in &self.env {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Merge the configured arguments after `defaults`.
    ///
    /// - `replace_args == true`: the operator list wins wholesale.
    /// - otherwise: defaults first, operator args appended (last
    ///   occurrence wins for flag-style arguments downstream).
    #[must_use]
    pub fn effective_args(&self, defaults: &[String]) -> Vec<String> {
        if self.replace_args {
            return self.args.clone();
        }
        let mut merged = defaults.to_vec();
        merged.extend(self.args.iter().cloned());
        merged
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROVISION CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// The full provisioning document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Bootstrap identity and install target. `None` means the
    /// document carries no meshboot instructions at all.
    pub node: Option<NodeSection>,

    /// Cluster service settings.
    pub cluster: ClusterConfig,
}

impl ProvisionConfig {
    /// Parse a document from its YAML representation.
    ///
    /// This is the single translation point between the schema-light
    /// pairing payload and the typed document.
    pub fn from_yaml(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Render the document back to YAML (for handing to the
    /// installer collaborator).
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Scan directories for a provisioning document.
    ///
    /// Reads `*.yaml` / `*.yml` files in each directory (sorted for
    /// determinism) and returns the first one that parses and carries
    /// a `node:` section. Unreadable or unparseable files are
    /// skipped; a half-written cloud-config next to a valid one must
    /// not abort boot.
    pub fn scan<P: AsRef<Path>>(dirs: &[P]) -> Result<Self, ConfigError> {
        for dir in dirs {
            let entries = match std::fs::read_dir(dir.as_ref()) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            let mut paths: Vec<_> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yaml") | Some("yml")
                    )
                })
                .collect();
            paths.sort();

            for path in paths {
                let Ok(content) = std::fs::read_to_string(&path) else {
                    continue;
                };
                if let Ok(cfg) = Self::from_yaml(&content) {
                    if cfg.node.is_some() {
                        return Ok(cfg);
                    }
                }
            }
        }
        Err(ConfigError::MissingDocument)
    }

    /// The forced role, if the operator pinned one.
    #[must_use]
    pub fn forced_role(&self) -> Option<NodeRole> {
        self.node.as_ref().and_then(|n| n.role)
    }

    /// The pre-shared pairing token, if any and non-empty.
    #[must_use]
    pub fn network_token(&self) -> Option<&str> {
        self.node
            .as_ref()
            .map(|n| n.network_token.as_str())
            .filter(|t| !t.is_empty())
    }

    /// The install target device.
    ///
    /// Errors are precondition failures: [`ConfigError::MissingDocument`]
    /// when there is no `node:` section, [`ConfigError::MissingDevice`]
    /// when the section names no device.
    pub fn device(&self) -> Result<&str, ConfigError> {
        let node = self.node.as_ref().ok_or(ConfigError::MissingDocument)?;
        if node.device.is_empty() {
            return Err(ConfigError::MissingDevice);
        }
        Ok(&node.device)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
