//! # Distributed Ledger Boundary
//!
//! The shared key/value ledger replicated across nodes by the mesh
//! transport. Writes are fire-and-forget: the transport announces them
//! in the background with its own retry/backoff and an eventual
//! give-up horizon. Reads may observe stale data.
//!
//! The agent therefore never assumes a write is visible to other
//! nodes when `set` returns, and never assumes read-your-write
//! consistency. Per-key convergence is last-writer-wins; there is no
//! cross-key mutual exclusion; role uniqueness is election policy,
//! not a storage guarantee.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

// ════════════════════════════════════════════════════════════════════════════
// LEDGER KEYS
// ════════════════════════════════════════════════════════════════════════════

/// Well-known ledger namespaces and keys.
pub mod keys {
    /// `role/<nodeUUID> = "master" | "worker"`.
    pub const ROLE: &str = "role";
    /// `nodetoken/token = <join token>`.
    pub const NODETOKEN: &str = "nodetoken";
    /// Key under [`NODETOKEN`].
    pub const TOKEN: &str = "token";
    /// `kubeconfig/master = <base64 cluster credential>`.
    pub const KUBECONFIG: &str = "kubeconfig";
    /// `master/ip = <overlay address>`; also the key under [`KUBECONFIG`].
    pub const MASTER: &str = "master";
    /// Key under [`MASTER`].
    pub const IP: &str = "ip";
}

// ════════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Capability surface of the distributed ledger.
///
/// Implementors MUST be `Send + Sync` and MUST NOT block: `set`
/// returns once the write is accepted locally, not once it has
/// propagated. `get` serves the local replica's current view, which
/// may lag other writers.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Record `namespace/key = value`. Fire-and-forget; propagation
    /// and retry are the transport's concern.
    async fn set(&self, namespace: &str, key: &str, value: &str);

    /// Read the local replica's view of `namespace/key`.
    async fn get(&self, namespace: &str, key: &str) -> Option<String>;
}

// ════════════════════════════════════════════════════════════════════════════
// IN-MEMORY FAKE
// ════════════════════════════════════════════════════════════════════════════

/// A single recorded ledger write, kept by [`MemoryLedger`] so tests
/// can assert on publication counts and ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerWrite {
    pub namespace: String,
    pub key: String,
    pub value: String,
}

/// In-memory [`LedgerClient`] for tests and development.
///
/// Serves reads last-write-wins per `(namespace, key)` and keeps the
/// full write log. Shared-state only; no propagation is simulated.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: RwLock<HashMap<(String, String), String>>,
    log: RwLock<Vec<LedgerWrite>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write ever issued, in order.
    pub fn writes(&self) -> Vec<LedgerWrite> {
        self.log.read().clone()
    }

    /// Number of writes issued to `namespace/key`.
    pub fn writes_to(&self, namespace: &str, key: &str) -> usize {
        self.log
            .read()
            .iter()
            .filter(|w| w.namespace == namespace && w.key == key)
            .count()
    }

    /// Seed an entry without logging a write (peer-published state).
    pub fn seed(&self, namespace: &str, key: &str, value: &str) {
        self.entries
            .write()
            .insert((namespace.to_string(), key.to_string()), value.to_string());
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn set(&self, namespace: &str, key: &str, value: &str) {
        self.entries
            .write()
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        self.log.write().push(LedgerWrite {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    async fn get(&self, namespace: &str, key: &str) -> Option<String> {
        self.entries
            .read()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get_local_view() {
        let ledger = MemoryLedger::new();
        ledger.set(keys::MASTER, keys::IP, "10.1.0.1").await;
        assert_eq!(
            ledger.get(keys::MASTER, keys::IP).await.as_deref(),
            Some("10.1.0.1")
        );
    }

    #[tokio::test]
    async fn test_last_writer_wins_per_key() {
        let ledger = MemoryLedger::new();
        ledger.set(keys::ROLE, "uuid-a", "worker").await;
        ledger.set(keys::ROLE, "uuid-a", "master").await;
        assert_eq!(
            ledger.get(keys::ROLE, "uuid-a").await.as_deref(),
            Some("master")
        );
        assert_eq!(ledger.writes_to(keys::ROLE, "uuid-a"), 2);
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.get(keys::NODETOKEN, keys::TOKEN).await, None);
    }

    #[tokio::test]
    async fn test_seed_does_not_log() {
        let ledger = MemoryLedger::new();
        ledger.seed(keys::MASTER, keys::IP, "10.1.0.9");
        assert_eq!(ledger.writes().len(), 0);
        assert_eq!(
            ledger.get(keys::MASTER, keys::IP).await.as_deref(),
            Some("10.1.0.9")
        );
    }
}
