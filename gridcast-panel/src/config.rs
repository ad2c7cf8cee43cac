//! Configuration for the panel receiver.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Display settings.
    pub display: DisplayConfig,
    /// Bootloader-reboot gating.
    pub bootloader: BootloaderConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind HTTP and UDP on.
    pub bind: String,
    /// Shared port for both protocols.
    pub port: u16,
}

/// Display configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Initial brightness, 0.0–1.0.
    pub brightness: f32,
    /// Render tick in milliseconds.
    pub tick_ms: u64,
}

/// Bootloader-reboot gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootloaderConfig {
    /// Hostnames or addresses allowed to trigger a bootloader reboot.
    pub allowed_hosts: Vec<String>,
    /// Router address, always denied. Empty disables the check.
    pub gateway: String,
    /// /24 fallback admitted only when `allowed_hosts` resolves empty.
    pub fallback_subnet: String,
    /// Whether the flashing transport is considered connected.
    pub armed: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            display: DisplayConfig::default(),
            bootloader: BootloaderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            // Producers default to port 80; on a hosted panel we stay
            // unprivileged and expect the client to be pointed here.
            port: 8080,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            brightness: 0.5,
            tick_ms: 20,
        }
    }
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            gateway: String::new(),
            fallback_subnet: "10.0.0.0".into(),
            armed: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl PanelConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }
}

impl BootloaderConfig {
    pub fn gateway_addr(&self) -> Option<Ipv4Addr> {
        self.gateway.parse().ok()
    }

    pub fn fallback_subnet_addr(&self) -> Option<Ipv4Addr> {
        self.fallback_subnet.parse().ok()
    }
}

// ── Tests ────────────────────────────────────────────────────────
