//! portrelay - forward an external TCP port to a loopback backend
//!
//! # Usage
//!
//! ```bash
//! # Expose a dev server on 127.0.0.1:8080 on the first free port from 5000
//! portrelay --internal-port 8080
//!
//! # Fixed external port, rewriting Host headers for the backend
//! portrelay -e 5000 -i 8080 --rewrite-host-header
//!
//! # List the addresses remote clients can use
//! portrelay --list-ips
//! ```

use anyhow::Context;
use clap::Parser;
use portrelay::config::{default_settings_path, RelayConfig, Settings};
use portrelay::net_info::{
    find_available_port, is_port_available, local_ipv4_addresses, DEFAULT_SEARCH_START,
};
use portrelay::relay::RelayListener;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long to wait for open relays after Ctrl-C before exiting anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "portrelay")]
#[command(
    author,
    version,
    about = "Forward an external TCP port to a loopback backend port"
)]
struct Args {
    /// Port to accept connections on (default: first free port from 5000)
    #[arg(short, long, env = "PORTRELAY_EXTERNAL_PORT")]
    external_port: Option<u16>,

    /// Loopback port of the backend (default: the one used last time)
    #[arg(short, long, env = "PORTRELAY_INTERNAL_PORT")]
    internal_port: Option<u16>,

    /// Rewrite the HTTP Host header to localhost:<internal-port>
    #[arg(long, overrides_with = "no_rewrite_host_header")]
    rewrite_host_header: bool,

    /// Forward the Host header unchanged
    #[arg(long, overrides_with = "rewrite_host_header")]
    no_rewrite_host_header: bool,

    /// Close a connection after this many seconds without traffic
    #[arg(long, default_value = "60")]
    idle_timeout_secs: u64,

    /// Longest pause between checks on an idle connection, in milliseconds
    #[arg(long, default_value = "100")]
    poll_interval_ms: u64,

    /// Per-connection copy buffer size in bytes
    #[arg(long, default_value = "16384")]
    buffer_size: usize,

    /// Settings file remembering the last internal port and rewrite choice
    #[arg(long, env = "PORTRELAY_SETTINGS")]
    settings: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print this host's IPv4 addresses and exit
    #[arg(long)]
    list_ips: bool,
}

impl Args {
    fn rewrite_choice(&self) -> Option<bool> {
        if self.rewrite_host_header {
            Some(true)
        } else if self.no_rewrite_host_header {
            Some(false)
        } else {
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    if args.list_ips {
        for ip in local_ipv4_addresses() {
            println!("{ip}");
        }
        return Ok(());
    }

    let settings_path = args.settings.clone().or_else(default_settings_path);
    let settings = settings_path
        .as_deref()
        .map(Settings::load)
        .unwrap_or_default();

    let internal_port = args
        .internal_port
        .or(settings.internal_port)
        .context("No internal port given and none remembered; pass --internal-port")?;
    let rewrite_host_header = args
        .rewrite_choice()
        .unwrap_or(settings.rewrite_host_header);
    let external_port = match args.external_port {
        Some(port) => port,
        None => find_available_port(DEFAULT_SEARCH_START)
            .context("No available external port found")?,
    };

    let config = RelayConfig::new(external_port, internal_port, rewrite_host_header)
        .with_idle_timeout(Duration::from_secs(args.idle_timeout_secs))
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_buffer_size(args.buffer_size);
    config.validate()?;

    if !is_port_available(external_port) {
        anyhow::bail!("Port {external_port} is not available, please select a different port.");
    }

    let handle = RelayListener::new(config)
        .start()
        .context("Failed to start relay")?;

    let addresses = local_ipv4_addresses();
    if addresses.is_empty() {
        info!("Reachable on port {} of this host", external_port);
    }
    for ip in addresses {
        info!("Reachable at http://{}:{}", ip, external_port);
    }
    info!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    if !handle.shutdown(SHUTDOWN_GRACE).await {
        warn!(
            "{} connection(s) still open after {:?}, exiting anyway",
            handle.active_relays(),
            SHUTDOWN_GRACE
        );
    }

    if let Some(path) = settings_path {
        let settings = Settings {
            internal_port: Some(internal_port),
            rewrite_host_header,
        };
        if let Err(e) = settings.save(&path) {
            warn!("Could not save settings: {:#}", e);
        }
    }

    Ok(())
}
