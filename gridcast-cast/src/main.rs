//! gridcast-cast — entry point.
//!
//! ```text
//! gridcast-cast --host 10.0.0.50   Stream the default pattern
//! gridcast-cast --pattern bars     Pick a test pattern
//! gridcast-cast --config <path>    Load a custom config TOML
//! gridcast-cast --gen-config       Write default config to stdout
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gridcast_core::producer::{PanelClient, StreamConfig, StreamService};

use gridcast_cast::config::CastConfig;
use gridcast_cast::pattern::{Pattern, PatternSource};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gridcast-cast", about = "gridcast panel streaming client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gridcast-cast.toml")]
    config: PathBuf,

    /// Override the panel host.
    #[arg(long)]
    host: Option<String>,

    /// Override the panel port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the test pattern (plasma, bars, sweep).
    #[arg(long)]
    pattern: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&CastConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = CastConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.panel.host = host;
    }
    if let Some(port) = cli.port {
        config.panel.port = port;
    }
    if let Some(pattern) = cli.pattern {
        config.source.pattern = pattern;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("gridcast-cast v{}", env!("CARGO_PKG_VERSION"));
    info!("panel: {}:{}", config.panel.host, config.panel.port);
    info!("pattern: {}", config.source.pattern);

    let pattern: Pattern = config.source.pattern.parse()?;
    let mut source = PatternSource::new(pattern, config.source.width, config.source.height);

    let client = PanelClient::connect(&config.to_transport()).await?;
    let service = StreamService::start(
        client,
        StreamConfig {
            host_fps: config.source.host_fps,
            target_fps: config.source.target_fps,
        },
    );

    // Source loop: generate at the host rate until Ctrl-C; the
    // service throttles down to the panel rate internally.
    let tick = Duration::from_millis((1000 / config.source.host_fps.max(1) as u64).max(1));
    let mut timer = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received — shutting down");
                break;
            }
            _ = timer.tick() => {
                service.offer_capture(&source.next())?;
            }
        }
    }

    service.shutdown().await?;
    Ok(())
}
