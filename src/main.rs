use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};

use portscout::models::{PortRange, Protocol, TransportMode};
use portscout::output;
use portscout::scanner::{Scanner, DEFAULT_WORKERS};

/// Concurrent TCP/UDP port scanner with proxy and Tor routing
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Target IP address or hostname
    target: String,

    /// Port range to scan (e.g. 1-1024, or a single port)
    #[clap(short, long, default_value = "1-1024")]
    ports: String,

    /// Protocol to probe with (tcp or udp)
    #[clap(long, default_value = "tcp")]
    protocol: Protocol,

    /// Route TCP probes through an HTTP forward proxy (host:port)
    #[clap(long, conflicts_with = "tor")]
    proxy: Option<String>,

    /// Route TCP probes through a running Tor client
    #[clap(long)]
    tor: bool,

    /// Local SOCKS endpoint of the Tor client
    #[clap(long, default_value = "127.0.0.1:9050")]
    tor_socks: SocketAddr,

    /// Number of concurrent probe workers
    #[clap(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Per-probe timeout in seconds
    #[clap(short, long, default_value_t = 1.0)]
    timeout: f64,

    /// Write results as CSV; a summary chart is written next to it
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Write a PDF report
    #[clap(long)]
    pdf: Option<PathBuf>,

    /// Write the full report as JSON
    #[clap(short, long)]
    json: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[clap(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

/// Resolve the target to an address before the scan starts. Prefers IPv4
/// when the name resolves to both families.
async fn resolve_target(target: &str) -> Result<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(format!("{target}:0"))
        .await
        .with_context(|| format!("DNS resolution failed for {target}"))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| anyhow!("Could not resolve '{}' to an address", target))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let ports = PortRange::parse(&args.ports).map_err(|e| anyhow!("{e}"))?;
    if !args.timeout.is_finite() || args.timeout <= 0.0 {
        bail!("--timeout must be positive");
    }

    let transport = if let Some(endpoint) = args.proxy.clone() {
        TransportMode::ForwardProxy(endpoint)
    } else if args.tor {
        TransportMode::Overlay(args.tor_socks)
    } else {
        TransportMode::Direct
    };

    let target_ip = resolve_target(&args.target).await?;

    let scanner = Scanner::new(
        args.target.clone(),
        target_ip,
        args.protocol,
        ports,
        transport,
        args.workers,
        Duration::from_secs_f64(args.timeout),
    )?;
    let report = scanner.run_scan().await?;

    output::print_report(&report);

    if let Some(csv_path) = &args.output {
        output::write_csv(&report, csv_path)?;
        info!("Results saved to {}", csv_path.display());
        let chart_path = output::chart_path_for(csv_path);
        output::write_chart(&report, &chart_path)?;
        info!("Chart saved to {}", chart_path.display());
    }
    if let Some(pdf_path) = &args.pdf {
        output::write_pdf(&report, pdf_path)?;
        info!("PDF report saved to {}", pdf_path.display());
    }
    if let Some(json_path) = &args.json {
        output::write_json(&report, json_path)?;
        info!("JSON results saved to {}", json_path.display());
    }

    Ok(())
}
