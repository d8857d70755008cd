//! sooper-midi-bridge
//!
//! Translates MIDI from a controller into OSC for SooperLooper.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sooper_midi_bridge::config::{watcher, AppConfig, BindingWatcher};
use sooper_midi_bridge::midi::PortKind;
use sooper_midi_bridge::{cli, paths, sniffer, Bridge};

/// SooperLooper MIDI bridge - map MIDI controllers to SooperLooper OSC
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// OSC destination, e.g. osc.udp://localhost:9951/
    #[arg(short, long, env = "SL_OSC_URL")]
    osc_url: Option<String>,

    /// MIDI input kind (alsa, fifo, midir, virtual)
    #[arg(short, long)]
    kind: Option<PortKind>,

    /// Device path, FIFO path or port name substring
    #[arg(short, long)]
    device: Option<String>,

    /// Client name used when registering MIDI ports
    #[arg(short, long)]
    name: Option<String>,

    /// Binding file to load (repeatable, appended to the configured ones)
    #[arg(short, long = "bindings")]
    bindings: Vec<String>,

    /// Reload bindings when a binding file changes
    #[arg(short, long)]
    watch: bool,

    /// Start the interactive console
    #[arg(short, long)]
    interactive: bool,

    /// List available MIDI input ports
    #[arg(long)]
    list_ports: bool,

    /// Print incoming MIDI instead of bridging it
    #[arg(long)]
    sniff: bool,

    /// Include clock and active sensing in sniffer output
    #[arg(long, requires = "sniff")]
    show_clock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = load_config(&args).await?;
    init_logging(&config.log_level)?;

    if args.list_ports {
        sniffer::list_ports_formatted();
        return Ok(());
    }

    if args.sniff {
        let handle = sniffer::start(&config.port_request(), args.show_clock)?;
        shutdown_signal().await;
        handle.stop();
        return Ok(());
    }

    info!("Starting sooper-midi-bridge v{}", env!("CARGO_PKG_VERSION"));
    let bridge = Bridge::new(&config.name, &config.osc_url, &config.port_request())
        .with_context(|| format!("Failed to start bridge to {}", config.osc_url))?;
    let bridge = Arc::new(bridge);
    if !bridge.has_input() {
        warn!("Running without MIDI input, bindings can still be edited");
    }

    let files = resolve_binding_files(&config.bindings);
    load_all(&bridge, &config.bindings);

    let watcher = if config.watch_bindings && !files.is_empty() {
        watcher::try_watch(files.clone())
    } else {
        None
    };

    let repl = args.interactive.then(|| spawn_repl(bridge.clone()));

    let result = run_app(&bridge, &config.bindings, watcher, repl, shutdown_signal()).await;

    if let Some(exit) = bridge.stop() {
        info!("Ingest loop exited: {:?}", exit);
    }
    info!("sooper-midi-bridge shutdown complete");
    result
}

async fn run_app(
    bridge: &Bridge,
    bindings: &[String],
    mut watcher: Option<BindingWatcher>,
    mut repl: Option<oneshot::Receiver<Result<()>>>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    let mut liveness = tokio::time::interval(Duration::from_millis(500));
    let watched_input = bridge.has_input();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            Some(changed) = next_change(&mut watcher) => {
                info!("Binding files changed ({:?}), reloading", changed);
                bridge.replace_bindings(bindings);
            }

            res = wait_repl(&mut repl) => {
                match res {
                    Ok(Ok(())) => info!("Console closed"),
                    Ok(Err(e)) => error!("Console failed: {:#}", e),
                    Err(_) => error!("Console thread ended unexpectedly"),
                }
                break;
            }

            _ = liveness.tick() => {
                if watched_input && !bridge.is_alive() {
                    anyhow::bail!("MIDI input closed, bridge stopped");
                }
            }
        }
    }

    Ok(())
}

async fn next_change(watcher: &mut Option<BindingWatcher>) -> Option<Vec<PathBuf>> {
    match watcher {
        Some(w) => w.next_change().await,
        None => std::future::pending().await,
    }
}

async fn wait_repl(
    repl: &mut Option<oneshot::Receiver<Result<()>>>,
) -> Result<Result<()>, oneshot::error::RecvError> {
    match repl {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

/// The console blocks on stdin, so it gets its own thread. The runtime
/// never waits for it on shutdown.
fn spawn_repl(bridge: Arc<Bridge>) -> oneshot::Receiver<Result<()>> {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(cli::run_repl(bridge));
    });
    rx
}

/// Load every configured binding file in order; failures are reported and skipped.
fn load_all(bridge: &Bridge, files: &[String]) {
    for file in files {
        if let Err(e) = bridge.load_bindings(file) {
            warn!("Skipping bindings {}: {}", file, e);
        }
    }
}

fn resolve_binding_files(files: &[String]) -> Vec<PathBuf> {
    let dirs = paths::binding_search_dirs();
    files
        .iter()
        .filter_map(|f| paths::find_binding_file(f.as_ref(), &dirs))
        .collect()
}

async fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path).await?,
        None => {
            let path = paths::default_config_path();
            if path.exists() {
                AppConfig::load(&path).await?
            } else {
                AppConfig::default()
            }
        }
    };

    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(url) = &args.osc_url {
        config.osc_url = url.clone();
    }
    if let Some(kind) = args.kind {
        config.midi.kind = kind;
    }
    if let Some(device) = &args.device {
        config.midi.device = device.clone();
    }
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    config.bindings.extend(args.bindings.iter().cloned());
    config.watch_bindings |= args.watch;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
