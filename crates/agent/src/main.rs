//! # Meshboot Agent Entry Point
//!
//! Boot-time glue around the library: pairing-driven installation for
//! unconfigured nodes and role coordination for installed ones.
//!
//! ## Usage
//!
//! ```text
//! meshboot-agent install [scan-dir ...]
//! meshboot-agent role <master|worker|ha-master>
//! ```
//!
//! `install` scans the given directories (or the built-in defaults)
//! for an existing configuration document; without one it opens a
//! pairing session on the console, cancellable with any keystroke.
//! `role` drives coordination attempts until the node is configured,
//! retrying while dependencies have not converged.
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use meshboot_common::{PairingToken, ProvisionConfig};

use meshboot_agent::install::{ExecInstaller, DOCUMENT_KEY};
use meshboot_agent::role::RoleDirective;
use meshboot_agent::transport::{SocketChannel, SocketLedger};
use meshboot_agent::{
    credentials::FileCredentialSource, network::EnvOverlay, service::SystemdService, AgentEvent,
    EventBus, InstallRequest, Installer, PairOutcome, PairingEngine, PairingScreen,
    RoleCoordinator, SentinelStore,
};

// ════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

/// Directories scanned for a configuration document, in order.
const DEFAULT_SCAN_DIRS: &[&str] = &["/oem", "/usr/local/cloud-config", "/run/initramfs/live"];

/// On-disk imaging tool invoked for installs.
const INSTALLER_BIN: &str = "/usr/bin/elemental";

/// Cluster service unit driven by role coordination.
const SERVICE_UNIT: &str = "k3s";

/// Pause between coordination attempts while dependencies converge.
const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Grace period announced before the pairing session opens, giving
/// the operator a window to abort.
const PAIRING_LEAD_IN: Duration = Duration::from_secs(5);

// ════════════════════════════════════════════════════════════════════════════
// CONSOLE SCREEN
// ════════════════════════════════════════════════════════════════════════════

/// Pairing presentation on the boot console. This is operator UI, the
/// one sanctioned stdout surface in the agent.
struct ConsoleScreen;

impl PairingScreen for ConsoleScreen {
    fn present(&self, token: &PairingToken) {
        println!();
        println!("  Pairing token: {}", token.as_str());
        println!();
        println!("  Enter this token on a trusted device to provision the node.");
        println!("  Press any key to cancel.");
        println!();
    }

    fn release(&self) {
        println!("  Pairing session closed.");
    }
}

/// Cancel `token` on the first console keystroke.
fn cancel_on_keystroke(token: CancellationToken) {
    tokio::spawn(async move {
        let mut byte = [0u8; 1];
        if tokio::io::stdin().read(&mut byte).await.is_ok() {
            token.cancel();
        }
    });
}

// ════════════════════════════════════════════════════════════════════════════
// INSTALL FLOW
// ════════════════════════════════════════════════════════════════════════════

async fn run_install(dirs: &[String]) -> Result<()> {
    let scan_dirs: Vec<String> = if dirs.is_empty() {
        DEFAULT_SCAN_DIRS.iter().map(|d| d.to_string()).collect()
    } else {
        dirs.to_vec()
    };
    let config = ProvisionConfig::scan(&scan_dirs).unwrap_or_default();

    let bus = EventBus::initialized();

    let offline = config.node.as_ref().is_some_and(|n| n.offline);
    let options: HashMap<String, String> = if offline {
        info!("configuration already on disk, skipping pairing");
        let rendered = config.to_yaml().context("rendering on-disk document")?;
        [(DOCUMENT_KEY.to_string(), rendered)].into()
    } else {
        let cancel = CancellationToken::new();
        cancel_on_keystroke(cancel.clone());

        println!();
        println!(
            "  Starting pairing in {} seconds. Press any key to cancel.",
            PAIRING_LEAD_IN.as_secs()
        );
        tokio::select! {
            () = tokio::time::sleep(PAIRING_LEAD_IN) => {}
            () = cancel.cancelled() => {
                info!("pairing cancelled by operator");
                return Ok(());
            }
        }

        let channel = SocketChannel::system();
        let screen = ConsoleScreen;
        let existing = config.network_token().map(PairingToken::from_existing);
        let outcome = PairingEngine::new(&channel, &screen)
            .pair(existing, &cancel)
            .await
            .context("pairing")?;
        match outcome {
            PairOutcome::Paired(options) => options,
            PairOutcome::Cancelled => {
                info!("pairing cancelled by operator");
                return Ok(());
            }
        }
    };

    let payload = options.get(DOCUMENT_KEY).cloned().unwrap_or_default();
    bus.emit(AgentEvent::Install, &payload)
        .context("install event handlers")?;

    let request = InstallRequest::from_options(&options).context("validating install request")?;
    ExecInstaller::new(INSTALLER_BIN)
        .install(&request)
        .context("running imaging tool")?;
    info!(device = %request.device, "install complete");

    bus.emit(AgentEvent::Bootstrap, &payload)
        .context("bootstrap event handlers")?;

    if request.reboot {
        info!("rebooting");
        std::process::Command::new("reboot")
            .status()
            .context("invoking reboot")?;
    } else if request.poweroff {
        info!("powering off");
        std::process::Command::new("poweroff")
            .status()
            .context("invoking poweroff")?;
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// ROLE FLOW
// ════════════════════════════════════════════════════════════════════════════

async fn run_role(tag: &str) -> Result<()> {
    let Some(directive) = RoleDirective::from_str_tag(tag) else {
        bail!("unknown role `{tag}` (expected master, worker or ha-master)");
    };

    let scan_dirs: Vec<String> = DEFAULT_SCAN_DIRS.iter().map(|d| d.to_string()).collect();
    let config = ProvisionConfig::scan(&scan_dirs).unwrap_or_default();
    let node_uuid = node_uuid();
    info!(%node_uuid, ?directive, "starting role coordination");

    let ledger = SocketLedger::system();
    let service = SystemdService::new(SERVICE_UNIT);
    let credentials = FileCredentialSource::k3s();
    let overlay = EnvOverlay;
    let coordinator = RoleCoordinator::new(
        &node_uuid,
        &config,
        &ledger,
        &service,
        &credentials,
        &overlay,
        SentinelStore::system(),
    );

    // NotReady is the expected state early in boot; keep attempting
    // until the overlay and ledger have converged.
    loop {
        match coordinator.run(directive).await {
            Ok(()) => return Ok(()),
            Err(meshboot_agent::RoleError::NotReady(reason)) => {
                warn!(%reason, "dependencies not converged, retrying");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(err) => return Err(err).context("role coordination"),
        }
    }
}

/// Stable node identity: the machine id when present, otherwise a
/// fresh UUID (acceptable for stateless live environments).
fn node_uuid() -> String {
    std::fs::read_to_string("/etc/machine-id")
        .map(|id| id.trim().to_string())
        .ok()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ════════════════════════════════════════════════════════════════════════════

fn usage(prog: &str) -> String {
    format!("usage: {prog} install [scan-dir ...] | {prog} role <master|worker|ha-master>")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("install") => run_install(&args[2..]).await,
        Some("role") => match args.get(2) {
            Some(tag) => run_role(tag).await,
            None => Err(anyhow::anyhow!(usage(&args[0]))),
        },
        _ => Err(anyhow::anyhow!(usage(&args[0]))),
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}
