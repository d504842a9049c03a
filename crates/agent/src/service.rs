//! # OS Service Boundary
//!
//! The narrow interface the role coordinator uses to configure and
//! run the local cluster service. Coordination logic depends only on
//! [`ServiceManager`], never on process-spawning details, so it stays
//! portable and testable against [`RecordingService`].
//!
//! [`SystemdService`] is the OS adapter: it writes an environment
//! file and an `ExecStart` drop-in, then drives the unit through
//! `systemctl`. Service start/enable are synchronous from the
//! coordinator's perspective; they run to completion or fail outright.
//! There is no cancellation mid-way through service configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

// ════════════════════════════════════════════════════════════════════════════
// ERROR TYPE
// ════════════════════════════════════════════════════════════════════════════

/// Service configuration failures. All of them are fatal to the
/// current coordination attempt and must prevent sentinel creation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Failed to write the environment or drop-in file.
    #[error("failed to write service configuration {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The service manager binary could not be spawned.
    #[error("failed to invoke service manager: {0}")]
    Spawn(#[source] std::io::Error),

    /// The service manager reported a non-zero exit.
    #[error("`{command}` exited with status {status}")]
    Command { command: String, status: i32 },

    /// Injected failure from a test double.
    #[error("injected service failure: {0}")]
    Injected(&'static str),
}

// ════════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// What the coordinator needs from the init system, and nothing more.
pub trait ServiceManager: Send + Sync {
    /// Persist the service's environment variable mapping.
    fn write_env(&self, env: &HashMap<String, String>) -> Result<(), ServiceError>;

    /// Override the command line the service runs with.
    fn override_command(&self, command: &str) -> Result<(), ServiceError>;

    /// Start the service now.
    fn start(&self) -> Result<(), ServiceError>;

    /// Enable the service for subsequent boots.
    fn enable(&self) -> Result<(), ServiceError>;
}

// ════════════════════════════════════════════════════════════════════════════
// SYSTEMD ADAPTER
// ════════════════════════════════════════════════════════════════════════════

/// systemd-backed [`ServiceManager`] for one unit.
#[derive(Debug, Clone)]
pub struct SystemdService {
    unit: String,
    env_file: PathBuf,
    dropin_dir: PathBuf,
}

impl SystemdService {
    /// Adapter for `<unit>.service`, with the conventional env file
    /// and drop-in locations derived from the unit name.
    pub fn new(unit: impl Into<String>) -> Self {
        let unit = unit.into();
        Self {
            env_file: PathBuf::from(format!("/etc/sysconfig/{unit}")),
            dropin_dir: PathBuf::from(format!("/etc/systemd/system/{unit}.service.d")),
            unit,
        }
    }

    /// Override the env file and drop-in locations (tests, non-FHS
    /// distributions).
    pub fn with_paths(mut self, env_file: PathBuf, dropin_dir: PathBuf) -> Self {
        self.env_file = env_file;
        self.dropin_dir = dropin_dir;
        self
    }

    /// Atomic write: tmp file in the target directory, then rename.
    fn write_atomic(path: &PathBuf, content: &str) -> Result<(), ServiceError> {
        let wrap = |source| ServiceError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(wrap)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(wrap)?;
        std::fs::rename(&tmp, path).map_err(wrap)?;
        Ok(())
    }

    fn systemctl(&self, verb: &str) -> Result<(), ServiceError> {
        let status = Command::new("systemctl")
            .arg(verb)
            .arg(&self.unit)
            .status()
            .map_err(ServiceError::Spawn)?;
        if !status.success() {
            return Err(ServiceError::Command {
                command: format!("systemctl {verb} {}", self.unit),
                status: status.code().unwrap_or(-1),
            });
        }
        debug!(unit = %self.unit, verb, "systemctl ok");
        Ok(())
    }
}

impl ServiceManager for SystemdService {
    fn write_env(&self, env: &HashMap<String, String>) -> Result<(), ServiceError> {
        // Sorted for deterministic files across attempts.
        let mut keys: Vec<&String> = env.keys().collect();
        keys.sort();
        let content: String = keys
            .iter()
            .map(|k| format!("{k}=\"{}\"\n", env[*k]))
            .collect();
        Self::write_atomic(&self.env_file, &content)
    }

    fn override_command(&self, command: &str) -> Result<(), ServiceError> {
        let content = format!(
            "[Service]\nExecStart=\nExecStart={command}\nEnvironmentFile=-{}\n",
            self.env_file.display()
        );
        Self::write_atomic(&self.dropin_dir.join("override.conf"), &content)
    }

    fn start(&self) -> Result<(), ServiceError> {
        self.systemctl("start")
    }

    fn enable(&self) -> Result<(), ServiceError> {
        self.systemctl("enable")
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RECORDING FAKE
// ════════════════════════════════════════════════════════════════════════════

/// Recorded state of a [`RecordingService`].
#[derive(Debug, Default, Clone)]
pub struct ServiceCalls {
    pub env_writes: Vec<HashMap<String, String>>,
    pub commands: Vec<String>,
    pub starts: usize,
    pub enables: usize,
}

/// [`ServiceManager`] test double that records every call and can
/// inject failures at each step.
#[derive(Debug, Default)]
pub struct RecordingService {
    calls: Mutex<ServiceCalls>,
    pub fail_env: Mutex<bool>,
    pub fail_start: Mutex<bool>,
    pub fail_enable: Mutex<bool>,
}

impl RecordingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> ServiceCalls {
        self.calls.lock().clone()
    }

    pub fn set_fail_env(&self, fail: bool) {
        *self.fail_env.lock() = fail;
    }

    pub fn set_fail_start(&self, fail: bool) {
        *self.fail_start.lock() = fail;
    }

    pub fn set_fail_enable(&self, fail: bool) {
        *self.fail_enable.lock() = fail;
    }
}

impl ServiceManager for RecordingService {
    fn write_env(&self, env: &HashMap<String, String>) -> Result<(), ServiceError> {
        if *self.fail_env.lock() {
            return Err(ServiceError::Injected("write_env"));
        }
        self.calls.lock().env_writes.push(env.clone());
        Ok(())
    }

    fn override_command(&self, command: &str) -> Result<(), ServiceError> {
        self.calls.lock().commands.push(command.to_string());
        Ok(())
    }

    fn start(&self) -> Result<(), ServiceError> {
        if *self.fail_start.lock() {
            return Err(ServiceError::Injected("start"));
        }
        self.calls.lock().starts += 1;
        Ok(())
    }

    fn enable(&self) -> Result<(), ServiceError> {
        if *self.fail_enable.lock() {
            return Err(ServiceError::Injected("enable"));
        }
        self.calls.lock().enables += 1;
        Ok(())
    }
}
