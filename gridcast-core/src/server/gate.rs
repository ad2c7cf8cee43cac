//! IP allow-list guarding the bootloader-reboot endpoint.
//!
//! Allowed hosts are resolved exactly once at startup (numeric address
//! first, DNS fallback) and the resulting set is re-checked on every
//! request. Localhost is always allowed, the gateway is always denied,
//! and if resolution produced nothing a local-subnet fallback applies
//! so a panel on an isolated network stays flashable.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{info, warn};

// ── BootloaderGate ───────────────────────────────────────────────

/// Resolved allow-list plus subnet policy.
#[derive(Debug, Clone)]
pub struct BootloaderGate {
    allowed: Vec<IpAddr>,
    /// The router address, never allowed to trigger a bootloader drop.
    gateway: Option<Ipv4Addr>,
    /// /24 prefix admitted only when host resolution yielded nothing.
    fallback_subnet: Option<Ipv4Addr>,
}

impl BootloaderGate {
    /// A gate that admits only localhost (for tests and headless runs).
    pub fn localhost_only() -> Self {
        Self {
            allowed: Vec::new(),
            gateway: None,
            fallback_subnet: None,
        }
    }

    /// Build a gate from explicit, already-resolved addresses.
    pub fn from_addrs(
        allowed: Vec<IpAddr>,
        gateway: Option<Ipv4Addr>,
        fallback_subnet: Option<Ipv4Addr>,
    ) -> Self {
        Self {
            allowed,
            gateway,
            fallback_subnet,
        }
    }

    /// Resolve `hosts` once. Numeric addresses parse directly; names
    /// go through DNS. Unresolvable hosts are logged and skipped, not
    /// fatal — the subnet fallback covers the empty case.
    pub async fn resolve(
        hosts: &[String],
        gateway: Option<Ipv4Addr>,
        fallback_subnet: Option<Ipv4Addr>,
    ) -> Self {
        let mut allowed = Vec::with_capacity(hosts.len());
        for host in hosts {
            if let Ok(addr) = host.parse::<IpAddr>() {
                allowed.push(addr);
                continue;
            }
            match tokio::net::lookup_host((host.as_str(), 0)).await {
                Ok(mut addrs) => {
                    if let Some(resolved) = addrs.next() {
                        info!(host, ip = %resolved.ip(), "resolved bootloader host");
                        allowed.push(resolved.ip());
                    } else {
                        warn!(host, "bootloader host resolved to nothing");
                    }
                }
                Err(e) => warn!(host, error = %e, "failed to resolve bootloader host"),
            }
        }
        info!(
            count = allowed.len(),
            "bootloader allowed hosts resolved (+ localhost)"
        );
        Self {
            allowed,
            gateway,
            fallback_subnet,
        }
    }

    /// Per-request check against the startup-resolved set.
    pub fn is_allowed(&self, client: IpAddr) -> bool {
        // Gateway denied before anything else.
        if let (IpAddr::V4(v4), Some(gw)) = (client, self.gateway) {
            if v4 == gw {
                return false;
            }
        }

        if client.is_loopback() {
            return true;
        }

        if self.allowed.contains(&client) {
            return true;
        }

        // Subnet fallback only when resolution produced nothing.
        if self.allowed.is_empty() {
            if let (IpAddr::V4(v4), Some(subnet)) = (client, self.fallback_subnet) {
                return v4.octets()[..3] == subnet.octets()[..3];
            }
        }

        false
    }
}

// ── Tests ────────────────────────────────────────────────────────
