//! # Role Coordinator
//!
//! Decides what an installed node does on each boot and drives the
//! local cluster service accordingly, without a central control
//! plane. A node moves through:
//!
//! ```text
//! Unconfigured -> Electing -> ConfiguringService -> Configured
//!                                                      |
//!                              SteadyStatePropagation <-+  (every boot)
//! ```
//!
//! The transition into `Configured` is recorded by the [`SentinelStore`]
//! marker, which gates the whole service-configuration phase: once it
//! exists, attempts only republish ledger records.
//!
//! ## Failure discipline
//!
//! - Missing overlay address or missing master data: `NotReady`,
//!   retryable, nothing was changed.
//! - Service configuration/start/enable failures: fatal to the
//!   attempt; the sentinel is never created, so the next attempt
//!   redoes the whole phase.
//! - Ledger publication failures: logged and swallowed. Propagation
//!   is repeated on every attempt anyway, so a lost write costs one
//!   cycle, never the node's configuration.
//!
//! Every propagation pass ends with a fixed cooldown to throttle
//! ledger writes across the fleet.
//!
//! ## Known liveness gap
//!
//! Nothing arbitrates between two nodes that both self-elect master:
//! role records are per-node keys and the ledger offers no mutual
//! exclusion. Operators pin roles via configuration when that
//! matters; see `forced_role`.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;
use tracing::{info, warn};

use meshboot_common::{NodeRole, ProvisionConfig};

use crate::credentials::CredentialSource;
use crate::ledger::{keys, LedgerClient};
use crate::network::{OverlayNetwork, OVERLAY_IFACE};
use crate::sentinel::SentinelStore;
use crate::service::{ServiceError, ServiceManager};

// ════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

/// Cluster service binary driven by the coordinator.
pub const CLUSTER_BIN: &str = "/usr/bin/k3s";

/// Port the control plane listens on.
pub const CONTROL_PLANE_PORT: u16 = 6443;

/// Pause after each propagation pass, throttling ledger writes.
pub const PROPAGATION_COOLDOWN: Duration = Duration::from_secs(30);

// ════════════════════════════════════════════════════════════════════════════
// DIRECTIVE AND ERRORS
// ════════════════════════════════════════════════════════════════════════════

/// What the node has been told to become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDirective {
    /// Run the control plane and publish join credentials.
    Master,
    /// Join a control plane using ledger-published credentials.
    Worker,
    /// Additional control-plane node. Recognized but not implemented;
    /// see [`RoleCoordinator::run`].
    HaMaster,
}

impl RoleDirective {
    pub fn from_str_tag(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "master" => Some(RoleDirective::Master),
            "worker" => Some(RoleDirective::Worker),
            "ha-master" | "master/ha" => Some(RoleDirective::HaMaster),
            _ => None,
        }
    }
}

/// Coordination attempt failures.
#[derive(Debug, Error)]
pub enum RoleError {
    /// A dependency has not converged yet. Retryable; the attempt
    /// changed nothing.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Service configuration failed. Fatal to the attempt; the
    /// sentinel is left untouched.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The sentinel could not be recorded after a successful
    /// configuration.
    #[error("failed to record configuration sentinel: {0}")]
    Sentinel(#[source] io::Error),
}

// ════════════════════════════════════════════════════════════════════════════
// COORDINATOR
// ════════════════════════════════════════════════════════════════════════════

/// One node's role coordination logic over its external boundaries.
///
/// Holds no mutable state of its own; everything durable lives in the
/// sentinel and the ledger, so the coordinator can be rebuilt from
/// scratch on every boot or retry tick.
pub struct RoleCoordinator<'a> {
    node_uuid: &'a str,
    config: &'a ProvisionConfig,
    ledger: &'a dyn LedgerClient,
    service: &'a dyn ServiceManager,
    credentials: &'a dyn CredentialSource,
    overlay: &'a dyn OverlayNetwork,
    sentinel: SentinelStore,
    cooldown: Duration,
}

impl<'a> RoleCoordinator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_uuid: &'a str,
        config: &'a ProvisionConfig,
        ledger: &'a dyn LedgerClient,
        service: &'a dyn ServiceManager,
        credentials: &'a dyn CredentialSource,
        overlay: &'a dyn OverlayNetwork,
        sentinel: SentinelStore,
    ) -> Self {
        Self {
            node_uuid,
            config,
            ledger,
            service,
            credentials,
            overlay,
            sentinel,
            cooldown: PROPAGATION_COOLDOWN,
        }
    }

    /// Override the propagation cooldown (tests).
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Run one coordination attempt for `directive`.
    ///
    /// A forced role from the configuration document is published
    /// first, on every attempt, before any other step: it must win
    /// over whatever election logic or stale ledger state says.
    pub async fn run(&self, directive: RoleDirective) -> Result<(), RoleError> {
        if let Some(forced) = self.config.forced_role() {
            info!(role = %forced, "publishing operator-pinned role");
            self.ledger
                .set(keys::ROLE, self.node_uuid, forced.as_str())
                .await;
        }

        match directive {
            RoleDirective::Master => self.run_master().await,
            RoleDirective::Worker => self.run_worker().await,
            RoleDirective::HaMaster => {
                // Not a silent no-op by policy: the feature does not
                // exist yet and the log line must say so.
                warn!("ha-master directive is not implemented, skipping");
                Ok(())
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // MASTER PATH
    // ────────────────────────────────────────────────────────────────────────

    async fn run_master(&self) -> Result<(), RoleError> {
        // Per-attempt precondition, steady state included: every pass
        // republishes master/ip, and a master without an overlay
        // address has nothing valid to announce.
        let ip = self
            .overlay
            .address()
            .ok_or_else(|| RoleError::NotReady("overlay address not assigned yet".into()))?;

        if self.sentinel.exists() {
            info!("node already configured, republishing master records");
            self.propagate_master_data(ip).await;
            return Ok(());
        }

        // Compiled defaults; the operator document layers over them
        // per the replace_env/replace_args policy.
        let default_args = vec![
            "--with-node-id".to_string(),
            format!("--node-ip {ip}"),
            format!("--flannel-iface={OVERLAY_IFACE}"),
        ];
        let (env, args) = if self.config.cluster.enabled {
            (
                self.config.cluster.effective_env(&HashMap::new()),
                self.config.cluster.effective_args(&default_args),
            )
        } else {
            (HashMap::new(), default_args)
        };

        // Any failure from here to `enable` aborts with the sentinel
        // untouched, so the next attempt redoes the whole phase.
        self.service.write_env(&env)?;
        self.service
            .override_command(&format!("{CLUSTER_BIN} server {}", args.join(" ")))?;
        self.service.start()?;
        self.service.enable()?;
        info!(%ip, "control-plane service started and enabled");

        self.propagate_master_data(ip).await;

        // Strictly after start/enable. Publication failures above do
        // not block this: propagation repeats every attempt anyway.
        self.sentinel.create().map_err(RoleError::Sentinel)?;
        Ok(())
    }

    /// Publish the role record and join credentials, then cool down.
    ///
    /// Nothing in here is fatal. Credentials the distribution has not
    /// materialized yet are skipped with a warning and picked up on a
    /// later pass.
    async fn propagate_master_data(&self, ip: IpAddr) {
        self.ledger
            .set(keys::ROLE, self.node_uuid, NodeRole::Master.as_str())
            .await;
        self.ledger.set(keys::MASTER, keys::IP, &ip.to_string()).await;

        match self.credentials.join_token() {
            Ok(Some(token)) => self.ledger.set(keys::NODETOKEN, keys::TOKEN, &token).await,
            Ok(None) => warn!("join token not materialized yet, skipping"),
            Err(err) => warn!(%err, "failed to read join token, skipping"),
        }

        match self.credentials.cluster_credential() {
            Ok(Some(raw)) => {
                let encoded = URL_SAFE_NO_PAD.encode(raw);
                self.ledger.set(keys::KUBECONFIG, keys::MASTER, &encoded).await;
            }
            Ok(None) => warn!("cluster credential not materialized yet, skipping"),
            Err(err) => warn!(%err, "failed to read cluster credential, skipping"),
        }

        // Trailing step of every propagation pass: throttle writes.
        tokio::time::sleep(self.cooldown).await;
    }

    // ────────────────────────────────────────────────────────────────────────
    // WORKER PATH
    // ────────────────────────────────────────────────────────────────────────

    async fn run_worker(&self) -> Result<(), RoleError> {
        if self.sentinel.exists() {
            info!("node already configured, republishing role record");
            self.ledger
                .set(keys::ROLE, self.node_uuid, NodeRole::Worker.as_str())
                .await;
            tokio::time::sleep(self.cooldown).await;
            return Ok(());
        }

        // Both records come from a master's propagation pass; either
        // missing just means it has not converged here yet.
        let master_ip = self.ledger.get(keys::MASTER, keys::IP).await;
        let join_token = self.ledger.get(keys::NODETOKEN, keys::TOKEN).await;
        let (master_ip, join_token) = match (master_ip, join_token) {
            (Some(ip), Some(token)) => (ip, token),
            _ => {
                return Err(RoleError::NotReady(
                    "master address or join token not published yet".into(),
                ))
            }
        };

        let mut defaults = HashMap::new();
        defaults.insert(
            "K3S_URL".to_string(),
            format!("https://{master_ip}:{CONTROL_PLANE_PORT}"),
        );
        defaults.insert("K3S_TOKEN".to_string(), join_token);
        let (env, args) = if self.config.cluster.enabled {
            (
                self.config.cluster.effective_env(&defaults),
                self.config.cluster.effective_args(&[]),
            )
        } else {
            (defaults, Vec::new())
        };

        self.service.write_env(&env)?;
        let mut command = format!("{CLUSTER_BIN} agent");
        if !args.is_empty() {
            command = format!("{command} {}", args.join(" "));
        }
        self.service.override_command(&command)?;
        self.service.start()?;
        self.service.enable()?;
        info!(%master_ip, "worker service started and enabled");

        self.ledger
            .set(keys::ROLE, self.node_uuid, NodeRole::Worker.as_str())
            .await;

        self.sentinel.create().map_err(RoleError::Sentinel)?;
        tokio::time::sleep(self.cooldown).await;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use meshboot_common::{ClusterConfig, NodeSection};

    use crate::credentials::StaticCredentials;
    use crate::ledger::MemoryLedger;
    use crate::network::FixedOverlay;
    use crate::service::RecordingService;

    use super::*;

    struct Fixture {
        config: ProvisionConfig,
        ledger: MemoryLedger,
        service: RecordingService,
        credentials: StaticCredentials,
        overlay: FixedOverlay,
        sentinel: SentinelStore,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let addr: IpAddr = "10.1.0.1".parse().expect("addr");
            Self {
                config: ProvisionConfig::default(),
                ledger: MemoryLedger::new(),
                service: RecordingService::new(),
                credentials: StaticCredentials {
                    token: Some("K10abc::server:xyz".to_string()),
                    credential: Some(b"apiVersion: v1".to_vec()),
                    unavailable: false,
                },
                overlay: FixedOverlay::ready(addr),
                sentinel: SentinelStore::new(dir.path().join("configured")),
                _dir: dir,
            }
        }

        fn coordinator(&self) -> RoleCoordinator<'_> {
            RoleCoordinator::new(
                "node-1",
                &self.config,
                &self.ledger,
                &self.service,
                &self.credentials,
                &self.overlay,
                self.sentinel.clone(),
            )
            .with_cooldown(Duration::ZERO)
        }
    }

    // ──────────────────────────────────────────────────────────────────────
    // MASTER PATH
    // ──────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_master_first_attempt_configures_and_publishes() {
        let fx = Fixture::new();
        fx.coordinator()
            .run(RoleDirective::Master)
            .await
            .expect("first attempt");

        let calls = fx.service.calls();
        assert_eq!(calls.starts, 1);
        assert_eq!(calls.enables, 1);
        assert!(calls.commands[0].contains("k3s server"));
        assert!(calls.commands[0].contains("--flannel-iface=mesh0"));

        assert!(fx.sentinel.exists());
        assert_eq!(
            fx.ledger.get(keys::ROLE, "node-1").await.as_deref(),
            Some("master")
        );
        assert_eq!(
            fx.ledger.get(keys::MASTER, keys::IP).await.as_deref(),
            Some("10.1.0.1")
        );
        assert_eq!(
            fx.ledger.get(keys::NODETOKEN, keys::TOKEN).await.as_deref(),
            Some("K10abc::server:xyz")
        );
        let encoded = fx
            .ledger
            .get(keys::KUBECONFIG, keys::MASTER)
            .await
            .expect("kubeconfig published");
        assert_eq!(
            URL_SAFE_NO_PAD.decode(encoded).expect("valid base64"),
            b"apiVersion: v1"
        );
    }

    #[tokio::test]
    async fn test_master_attempts_are_idempotent_on_service() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator();
        for _ in 0..3 {
            coordinator.run(RoleDirective::Master).await.expect("attempt");
        }

        // One service configuration, but publication every attempt.
        assert_eq!(fx.service.calls().starts, 1);
        assert_eq!(fx.service.calls().enables, 1);
        assert_eq!(fx.ledger.writes_to(keys::ROLE, "node-1"), 3);
        assert_eq!(fx.ledger.writes_to(keys::NODETOKEN, keys::TOKEN), 3);
    }

    #[tokio::test]
    async fn test_master_not_ready_without_overlay_address() {
        let mut fx = Fixture::new();
        fx.overlay = FixedOverlay::not_ready();

        let err = fx
            .coordinator()
            .run(RoleDirective::Master)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleError::NotReady(_)));
        assert!(!fx.sentinel.exists());
        assert_eq!(fx.service.calls().starts, 0);
    }

    #[tokio::test]
    async fn test_steady_state_still_requires_overlay_address() {
        let mut fx = Fixture::new();
        fx.sentinel.create().expect("node already configured");
        fx.overlay = FixedOverlay::not_ready();

        // An already-configured master with no address has nothing
        // valid to republish; the attempt must fail retryable, not
        // degrade silently.
        let err = fx
            .coordinator()
            .run(RoleDirective::Master)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleError::NotReady(_)));
        assert!(fx.ledger.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_pass_pays_the_cooldown() {
        let fx = Fixture::new();
        // Default cooldown, no test override.
        let coordinator = RoleCoordinator::new(
            "node-1",
            &fx.config,
            &fx.ledger,
            &fx.service,
            &fx.credentials,
            &fx.overlay,
            fx.sentinel.clone(),
        );

        let begin = tokio::time::Instant::now();
        coordinator
            .run(RoleDirective::Master)
            .await
            .expect("attempt");
        assert!(begin.elapsed() >= PROPAGATION_COOLDOWN);
    }

    #[tokio::test]
    async fn test_service_failure_leaves_sentinel_absent() {
        let fx = Fixture::new();
        fx.service.set_fail_start(true);

        let err = fx
            .coordinator()
            .run(RoleDirective::Master)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleError::Service(_)));
        assert!(!fx.sentinel.exists(), "sentinel must not gate a failed start");

        // Recovery: the next attempt redoes the whole phase.
        fx.service.set_fail_start(false);
        fx.coordinator()
            .run(RoleDirective::Master)
            .await
            .expect("retry");
        assert!(fx.sentinel.exists());
    }

    #[tokio::test]
    async fn test_publication_failure_after_start_still_configures() {
        let mut fx = Fixture::new();
        fx.credentials.unavailable = true;

        fx.coordinator()
            .run(RoleDirective::Master)
            .await
            .expect("credential trouble is non-fatal");

        assert!(fx.sentinel.exists());
        assert_eq!(fx.service.calls().starts, 1);
        assert_eq!(fx.ledger.writes_to(keys::NODETOKEN, keys::TOKEN), 0);
        // The role record itself still went out.
        assert_eq!(fx.ledger.writes_to(keys::ROLE, "node-1"), 1);
    }

    #[tokio::test]
    async fn test_forced_role_published_before_anything_every_attempt() {
        let mut fx = Fixture::new();
        fx.config.node = Some(NodeSection {
            role: Some(NodeRole::Worker),
            ..Default::default()
        });
        fx.overlay = FixedOverlay::not_ready();

        // Even a NotReady attempt publishes the pinned role first.
        let coordinator = fx.coordinator();
        for _ in 0..2 {
            let _ = coordinator.run(RoleDirective::Master).await;
        }

        let writes = fx.ledger.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.value == "worker"));
    }

    #[tokio::test]
    async fn test_master_env_and_args_merge_when_enabled() {
        let mut fx = Fixture::new();
        fx.config.cluster = ClusterConfig {
            enabled: true,
            env: [("CLUSTER_LOG".to_string(), "debug".to_string())].into(),
            args: vec!["--disable=traefik".to_string()],
            ..Default::default()
        };

        fx.coordinator()
            .run(RoleDirective::Master)
            .await
            .expect("attempt");

        let calls = fx.service.calls();
        assert_eq!(
            calls.env_writes[0].get("CLUSTER_LOG").map(String::as_str),
            Some("debug")
        );
        // Operator args appended after the compiled defaults.
        assert!(calls.commands[0].contains("--with-node-id"));
        assert!(calls.commands[0].ends_with("--disable=traefik"));
    }

    // ──────────────────────────────────────────────────────────────────────
    // WORKER PATH
    // ──────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_worker_not_ready_until_master_publishes() {
        let fx = Fixture::new();
        let err = fx
            .coordinator()
            .run(RoleDirective::Worker)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleError::NotReady(_)));
        assert!(!fx.sentinel.exists());

        // Only the address present is still not enough.
        fx.ledger.seed(keys::MASTER, keys::IP, "10.1.0.1");
        let err = fx
            .coordinator()
            .run(RoleDirective::Worker)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_worker_joins_with_published_master_data() {
        let fx = Fixture::new();
        fx.ledger.seed(keys::MASTER, keys::IP, "10.1.0.1");
        fx.ledger.seed(keys::NODETOKEN, keys::TOKEN, "K10abc");

        fx.coordinator()
            .run(RoleDirective::Worker)
            .await
            .expect("join");

        let calls = fx.service.calls();
        assert_eq!(calls.starts, 1);
        assert_eq!(
            calls.env_writes[0].get("K3S_URL").map(String::as_str),
            Some("https://10.1.0.1:6443")
        );
        assert_eq!(
            calls.env_writes[0].get("K3S_TOKEN").map(String::as_str),
            Some("K10abc")
        );
        assert!(calls.commands[0].contains("k3s agent"));

        assert!(fx.sentinel.exists());
        assert_eq!(
            fx.ledger.get(keys::ROLE, "node-1").await.as_deref(),
            Some("worker")
        );
    }

    #[tokio::test]
    async fn test_worker_steady_state_republishes_role_only() {
        let fx = Fixture::new();
        fx.ledger.seed(keys::MASTER, keys::IP, "10.1.0.1");
        fx.ledger.seed(keys::NODETOKEN, keys::TOKEN, "K10abc");

        let coordinator = fx.coordinator();
        coordinator.run(RoleDirective::Worker).await.expect("join");
        coordinator
            .run(RoleDirective::Worker)
            .await
            .expect("steady state");

        assert_eq!(fx.service.calls().starts, 1);
        assert_eq!(fx.ledger.writes_to(keys::ROLE, "node-1"), 2);
    }

    // ──────────────────────────────────────────────────────────────────────
    // HA MASTER
    // ──────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_ha_master_is_recognized_but_inert() {
        let fx = Fixture::new();
        fx.coordinator()
            .run(RoleDirective::HaMaster)
            .await
            .expect("recognized");
        assert_eq!(fx.service.calls().starts, 0);
        assert!(!fx.sentinel.exists());
    }

    #[test]
    fn test_directive_tags() {
        assert_eq!(
            RoleDirective::from_str_tag("master"),
            Some(RoleDirective::Master)
        );
        assert_eq!(
            RoleDirective::from_str_tag("ha-master"),
            Some(RoleDirective::HaMaster)
        );
        assert_eq!(RoleDirective::from_str_tag("arbiter"), None);
    }
}
