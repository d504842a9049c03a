//! # Overlay Network Boundary
//!
//! The mesh transport creates a virtual interface giving each node a
//! private address used by the ledger and by cluster services. Role
//! coordination cannot proceed before that address exists, but its
//! absence is an expected transient at boot: a retryable "not ready"
//! condition, never a fatal error.

use std::net::IpAddr;

/// Name of the overlay interface the cluster service binds to.
pub const OVERLAY_IFACE: &str = "mesh0";

/// Environment variable the transport unit exports with the node's
/// overlay address.
pub const OVERLAY_IP_ENV: &str = "MESHBOOT_OVERLAY_IP";

/// Where the node's overlay address comes from.
pub trait OverlayNetwork: Send + Sync {
    /// The node's address on the overlay, or `None` while the
    /// transport is still converging.
    fn address(&self) -> Option<IpAddr>;
}

/// [`OverlayNetwork`] reading the address exported by the transport
/// unit's environment.
#[derive(Debug, Default, Clone)]
pub struct EnvOverlay;

impl OverlayNetwork for EnvOverlay {
    fn address(&self) -> Option<IpAddr> {
        std::env::var(OVERLAY_IP_ENV).ok()?.parse().ok()
    }
}

/// Fixed-address [`OverlayNetwork`] for tests and static deployments.
#[derive(Debug, Clone, Default)]
pub struct FixedOverlay(pub Option<IpAddr>);

impl FixedOverlay {
    pub fn ready(addr: IpAddr) -> Self {
        Self(Some(addr))
    }

    pub fn not_ready() -> Self {
        Self(None)
    }
}

impl OverlayNetwork for FixedOverlay {
    fn address(&self) -> Option<IpAddr> {
        self.0
    }
}
