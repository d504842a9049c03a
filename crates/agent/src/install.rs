//! # Install Request Validation
//!
//! Turns the schema-light option mapping received during pairing into
//! a validated [`InstallRequest`] and hands it to the external imaging
//! tool. Partitioning, image layout, and bootloader work are entirely
//! the tool's concern; the agent only decides whether an install may
//! run and with what arguments.
//!
//! Preconditions are fatal and never retried: an install without a
//! configuration document or without a target device is an operator
//! mistake, not a transient.

use std::collections::HashMap;
use std::io::Write;
use std::process::Command;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use meshboot_common::{ConfigError, ProvisionConfig};

/// Option keys consumed by the agent itself, never forwarded to the
/// imaging tool.
pub const RESERVED_KEYS: [&str; 4] = ["device", "cc", "reboot", "poweroff"];

/// Option key carrying the raw configuration document.
pub const DOCUMENT_KEY: &str = "cc";

/// Option key naming the install target device.
pub const DEVICE_KEY: &str = "device";

// ════════════════════════════════════════════════════════════════════════════
// ERROR TYPE
// ════════════════════════════════════════════════════════════════════════════

/// Install failures.
#[derive(Debug, Error)]
pub enum InstallError {
    /// A precondition failed (missing document, missing device,
    /// unparseable document). Fatal, never retried.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The document could not be staged for the imaging tool.
    #[error("failed to stage configuration document: {0}")]
    Stage(#[source] std::io::Error),

    /// The imaging tool could not be spawned.
    #[error("failed to invoke imaging tool: {0}")]
    Spawn(#[source] std::io::Error),

    /// The imaging tool reported a non-zero exit.
    #[error("imaging tool exited with status {0}")]
    Failed(i32),
}

// ════════════════════════════════════════════════════════════════════════════
// REQUEST
// ════════════════════════════════════════════════════════════════════════════

/// A validated install, ready to hand to an [`Installer`].
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    /// Target block device.
    pub device: String,
    /// The raw configuration document, staged verbatim for the tool.
    pub raw_document: String,
    /// The parsed document (role, cluster settings, post-actions).
    pub document: ProvisionConfig,
    /// Pass-through tool arguments derived from non-reserved options.
    pub args: Vec<String>,
    /// Reboot once the install completes.
    pub reboot: bool,
    /// Power off once the install completes.
    pub poweroff: bool,
}

impl InstallRequest {
    /// Validate a pairing/option mapping into a request.
    ///
    /// The document (`cc`) is required. The device may come from the
    /// options or from the document's `node.device`; neither present
    /// is [`ConfigError::MissingDevice`]. Post-action flags are true
    /// when the option key is present OR the document sets them.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, InstallError> {
        let raw_document = options
            .get(DOCUMENT_KEY)
            .ok_or(ConfigError::MissingDocument)?
            .clone();
        let document = ProvisionConfig::from_yaml(&raw_document)?;

        let device = match options.get(DEVICE_KEY).filter(|d| !d.is_empty()) {
            Some(device) => device.clone(),
            None => document.device()?.to_string(),
        };

        let node = document.node.clone().unwrap_or_default();
        let reboot = options.contains_key("reboot") || node.reboot;
        let poweroff = options.contains_key("poweroff") || node.poweroff;

        Ok(Self {
            device,
            args: opts_to_args(options),
            raw_document,
            document,
            reboot,
            poweroff,
        })
    }
}

/// Convert non-reserved options into `--key value` argument pairs,
/// sorted by key for deterministic invocations. Empty values become
/// bare flags.
fn opts_to_args(options: &HashMap<String, String>) -> Vec<String> {
    let mut keys: Vec<&String> = options
        .keys()
        .filter(|k| !RESERVED_KEYS.contains(&k.as_str()))
        .collect();
    keys.sort();

    let mut args = Vec::new();
    for key in keys {
        args.push(format!("--{key}"));
        let value = &options[key];
        if !value.is_empty() {
            args.push(value.clone());
        }
    }
    args
}

// ════════════════════════════════════════════════════════════════════════════
// INSTALLER BOUNDARY
// ════════════════════════════════════════════════════════════════════════════

/// Executes a validated install.
pub trait Installer: Send + Sync {
    fn install(&self, request: &InstallRequest) -> Result<(), InstallError>;
}

/// [`Installer`] shelling out to the on-disk imaging tool.
///
/// Stages the document in a temp file and invokes
/// `<binary> <args..> --cloud-init <staged> <device>`.
#[derive(Debug, Clone)]
pub struct ExecInstaller {
    binary: String,
}

impl ExecInstaller {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Installer for ExecInstaller {
    fn install(&self, request: &InstallRequest) -> Result<(), InstallError> {
        let mut staged = tempfile::NamedTempFile::new().map_err(InstallError::Stage)?;
        staged
            .write_all(request.raw_document.as_bytes())
            .map_err(InstallError::Stage)?;

        info!(device = %request.device, "starting install");
        let status = Command::new(&self.binary)
            .args(&request.args)
            .arg("--cloud-init")
            .arg(staged.path())
            .arg(&request.device)
            .status()
            .map_err(InstallError::Spawn)?;

        if !status.success() {
            return Err(InstallError::Failed(status.code().unwrap_or(-1)));
        }
        Ok(())
    }
}

/// Recording [`Installer`] for tests.
#[derive(Debug, Default)]
pub struct RecordingInstaller {
    requests: Mutex<Vec<InstallRequest>>,
}

impl RecordingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<InstallRequest> {
        self.requests.lock().clone()
    }
}

impl Installer for RecordingInstaller {
    fn install(&self, request: &InstallRequest) -> Result<(), InstallError> {
        self.requests.lock().push(request.clone());
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
