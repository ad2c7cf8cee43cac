//! Configuration for the streaming client.

use std::path::Path;

use serde::{Deserialize, Serialize};

use gridcast_core::producer::{NetOwnership, TransportConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CastConfig {
    /// Target panel.
    pub panel: PanelTarget,
    /// Source generation settings.
    pub source: SourceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Target panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelTarget {
    /// Panel hostname or address.
    pub host: String,
    pub port: u16,
    /// Send full frames as UDP datagrams.
    pub prefer_udp: bool,
    /// Connect retries before giving up.
    pub connect_attempts: u32,
    /// Whether this process initializes the network stack itself.
    pub own_network: bool,
}

/// Source generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Rate the source produces frames at.
    pub host_fps: u32,
    /// Rate frames should reach the panel at.
    pub target_fps: u32,
    /// Source surface size (downsampled to 32×32).
    pub width: usize,
    pub height: usize,
    /// Test pattern: "plasma", "bars" or "sweep".
    pub pattern: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            panel: PanelTarget::default(),
            source: SourceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PanelTarget {
    fn default() -> Self {
        Self {
            host: "gridcast.local".into(),
            port: 8080,
            prefer_udp: true,
            connect_attempts: 10,
            own_network: false,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host_fps: 60,
            target_fps: 30,
            width: 128,
            height: 128,
            pattern: "plasma".into(),
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

impl CastConfig {
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

    /// Convert the panel section into a transport config.
    pub fn to_transport(&self) -> TransportConfig {
        TransportConfig {
            host: self.panel.host.clone(),
            port: self.panel.port,
            prefer_udp: self.panel.prefer_udp,
            connect_attempts: self.panel.connect_attempts.max(1),
            ownership: if self.panel.own_network {
                NetOwnership::Owned
            } else {
                NetOwnership::Borrowed
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_config() {
        let cfg = CastConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: CastConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.panel.port, 8080);
        assert_eq!(parsed.source.pattern, "plasma");
    }

    #[test]
    fn ownership_follows_flag() {
        let mut cfg = CastConfig::default();
        assert_eq!(cfg.to_transport().ownership, NetOwnership::Borrowed);
        cfg.panel.own_network = true;
        assert_eq!(cfg.to_transport().ownership, NetOwnership::Owned);
    }

    #[test]
    fn connect_attempts_never_zero() {
        let mut cfg = CastConfig::default();
        cfg.panel.connect_attempts = 0;
        assert_eq!(cfg.to_transport().connect_attempts, 1);
    }
}
