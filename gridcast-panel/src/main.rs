//! gridcast-panel — entry point.
//!
//! ```text
//! gridcast-panel                   Run headless (log output)
//! gridcast-panel --preview         Render to the terminal
//! gridcast-panel --port 9000      Override the listen port
//! gridcast-panel --config <path>  Load a custom config TOML
//! gridcast-panel --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gridcast_core::render::{DisplaySink, NoopWatchdog, RenderLoop};
use gridcast_core::server::gate::BootloaderGate;
use gridcast_core::{IngestServer, PanelContext, RebootKind, RenderExit};

use gridcast_panel::config::PanelConfig;
use gridcast_panel::display::{BootGlow, LogDisplay, TerminalPreview};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gridcast-panel", about = "gridcast LED panel receiver")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gridcast-panel.toml")]
    config: PathBuf,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Render frames to the terminal instead of logging them.
    #[arg(long)]
    preview: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&PanelConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = PanelConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("gridcast-panel v{}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}:{}", config.network.bind, config.network.port);

    // Resolve the bootloader allow-list once, before serving.
    let gate = BootloaderGate::resolve(
        &config.bootloader.allowed_hosts,
        config.bootloader.gateway_addr(),
        config.bootloader.fallback_subnet_addr(),
    )
    .await;

    let ctx = Arc::new(PanelContext::new(gate));
    ctx.brightness.set(config.display.brightness);
    ctx.bootloader_armed
        .store(config.bootloader.armed, Ordering::Release);

    let cancel = CancellationToken::new();

    // Streaming is best-effort: a failed bind leaves the panel
    // rendering its fallback rather than exiting.
    let bind = format!("{}:{}", config.network.bind, config.network.port);
    match IngestServer::bind(bind.parse()?).await {
        Ok(server) => {
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = server.run(ctx, cancel).await {
                    error!(error = %e, "ingest server failed");
                }
            });
        }
        Err(e) => warn!(error = %e, "could not bind {bind}; streaming disabled"),
    }

    // Ctrl-C handler.
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        cancel_clone.cancel();
    });

    let tick = Duration::from_millis(config.display.tick_ms.max(1));
    let exit = if cli.preview {
        run_render(
            ctx,
            TerminalPreview::new(config.display.brightness),
            tick,
            cancel.clone(),
        )
        .await?
    } else {
        run_render(ctx, LogDisplay::default(), tick, cancel.clone()).await?
    };

    // Stop the network side before acting on the exit reason so no
    // request is mid-flight when the process goes down.
    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    match exit {
        RenderExit::Cancelled => info!("stopped"),
        RenderExit::Reboot(RebootKind::Restart) => {
            info!("restart requested; exiting for the supervisor to relaunch");
        }
        RenderExit::Reboot(RebootKind::Bootloader) => {
            info!("bootloader reboot requested; exiting in flash mode");
        }
    }
    Ok(())
}

async fn run_render<D: DisplaySink + 'static>(
    ctx: Arc<PanelContext>,
    sink: D,
    tick: Duration,
    cancel: CancellationToken,
) -> Result<RenderExit, Box<dyn std::error::Error>> {
    let (_, exit) = RenderLoop::new(ctx, sink, BootGlow, NoopWatchdog)
        .with_tick(tick)
        .run(cancel)
        .await?;
    Ok(exit)
}
