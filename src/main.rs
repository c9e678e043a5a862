//! Edge Router
//!
//! Terminates TLS, matches the requested host and path, then redirects,
//! serves static files or proxies to a local upstream.
//!
//! # Architecture Overview
//!
//! ```text
//!                              ┌──────────────────────────────────────────────────────┐
//!                              │                     EDGE ROUTER                      │
//!                              │                                                      │
//!     Client Request           │  ┌──────────┐    ┌─────────┐    ┌──────────────┐     │
//!     ─────────────────────────┼─▶│   net    │───▶│  http   │───▶│   routing    │     │
//!                              │  │listener  │    │ server  │    │ host → route │     │
//!                              │  │ + SNI    │    └─────────┘    └──────┬───────┘     │
//!                              │  └──────────┘                          │             │
//!                              │                                        ▼             │
//!     Client Response          │                               ┌──────────────┐      │
//!     ◀────────────────────────┼───────────────────────────────│   actions    │◀─────┼──── Upstream
//!                              │                               │redirect/static│     │     (proxy)
//!                              │                               │   /proxy     │      │
//!                              │                               └──────────────┘      │
//!                              │  ┌────────────────────────────────────────────────┐ │
//!                              │  │  config + snapshot   observability   lifecycle │ │
//!                              │  └────────────────────────────────────────────────┘ │
//!                              └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use edge_router::config::loader::load_config;
use edge_router::config::watcher::ConfigWatcher;
use edge_router::lifecycle::{signals, startup};
use edge_router::observability::{logging, metrics};
use edge_router::{EdgeServer, Shutdown};

/// Minimal edge router.
#[derive(Debug, Parser)]
#[command(name = "edge-router", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edge-router.toml")]
    config: PathBuf,

    /// Profile to serve, overriding `active_profile`.
    #[arg(short, long)]
    profile: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,

    /// Print the selected profile as JSON and exit.
    #[arg(long)]
    print: bool,

    /// Do not watch the configuration file for changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if cli.check || cli.print {
        if cli.print {
            let (_, profile) = config
                .selected_profile(cli.profile.as_deref())
                .ok_or("no profile selected; set active_profile or pass --profile")?;
            println!("{}", serde_json::to_string_pretty(profile)?);
        } else {
            let name = startup::check(&config, cli.profile.as_deref())?;
            println!("configuration ok (profile {name})");
        }
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-router starting");

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let server = EdgeServer::new(&config, cli.profile.clone())?;
    let shutdown = Shutdown::new(Duration::from_secs(config.timeouts.shutdown_grace_secs));
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    // Dropping the watcher stops it, so keep it for the life of the process.
    let _watcher = if cli.no_watch {
        None
    } else {
        match ConfigWatcher::new(&cli.config, update_tx.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Config file watching unavailable");
                None
            }
        }
    };
    #[cfg(unix)]
    signals::spawn_reload_on_sighup(cli.config.clone(), update_tx)?;

    let mut server_task = tokio::spawn(server.run(update_rx, shutdown.subscribe()));

    tokio::select! {
        _ = signals::wait_for_termination() => {
            shutdown.trigger();
            // Listeners drain for `grace`; allow a little on top before giving up.
            match tokio::time::timeout(shutdown.grace() + Duration::from_secs(1), &mut server_task).await {
                Ok(joined) => joined??,
                Err(_) => tracing::warn!("Drain deadline exceeded, exiting"),
            }
        }
        joined = &mut server_task => joined??,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
