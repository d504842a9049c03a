//! # Join Credential Boundary
//!
//! Once the control-plane service is up, the cluster distribution
//! materializes a join token and an admin access credential on disk.
//! The master publishes both to the ledger so workers can join.
//!
//! The coordinator consumes them through [`CredentialSource`]; the
//! file-backed implementation knows the distribution's paths, and the
//! in-memory one serves tests. A source returning `Ok(None)` means
//! "not materialized yet"; the steady-state propagation will pick
//! the value up on a later attempt.

use std::io;
use std::path::PathBuf;

/// Where the master's join credentials come from.
pub trait CredentialSource: Send + Sync {
    /// The worker join token, trailing newline trimmed. `None` when
    /// the file exists but is empty.
    fn join_token(&self) -> io::Result<Option<String>>;

    /// The raw cluster access credential (published base64-encoded).
    fn cluster_credential(&self) -> io::Result<Option<Vec<u8>>>;
}

/// File-backed [`CredentialSource`] reading the distribution's
/// token and kubeconfig paths.
#[derive(Debug, Clone)]
pub struct FileCredentialSource {
    token_path: PathBuf,
    credential_path: PathBuf,
}

impl FileCredentialSource {
    pub fn new(token_path: impl Into<PathBuf>, credential_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            credential_path: credential_path.into(),
        }
    }

    /// The k3s-distribution defaults.
    pub fn k3s() -> Self {
        Self::new(
            "/var/lib/rancher/k3s/server/node-token",
            "/etc/rancher/k3s/k3s.yaml",
        )
    }
}

impl CredentialSource for FileCredentialSource {
    fn join_token(&self) -> io::Result<Option<String>> {
        let raw = std::fs::read_to_string(&self.token_path)?;
        let token = raw.trim_end_matches('\n');
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    fn cluster_credential(&self) -> io::Result<Option<Vec<u8>>> {
        let raw = std::fs::read(&self.credential_path)?;
        Ok((!raw.is_empty()).then_some(raw))
    }
}

/// Fixed-value [`CredentialSource`] for tests.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    pub token: Option<String>,
    pub credential: Option<Vec<u8>>,
    /// When true, both getters fail with `NotFound`, simulating the
    /// distribution not having materialized its files yet.
    pub unavailable: bool,
}

impl CredentialSource for StaticCredentials {
    fn join_token(&self) -> io::Result<Option<String>> {
        if self.unavailable {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no token file"));
        }
        Ok(self.token.clone())
    }

    fn cluster_credential(&self) -> io::Result<Option<Vec<u8>>> {
        if self.unavailable {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no credential file"));
        }
        Ok(self.credential.clone())
    }
}
