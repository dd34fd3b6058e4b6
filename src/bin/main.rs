//! instance-dns binary entry point.

use clap::Parser;
use instance_dns::ec2::Ec2Source;
use instance_dns::{telemetry, Config, DnsServer, InstanceCache};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

/// Authoritative DNS server for EC2 instances, keyed by Name and Role tags.
#[derive(Parser, Debug)]
#[command(name = "instance-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML). Missing files are skipped.
    #[arg(short, long, default_value = "instance-dns.toml")]
    config: PathBuf,

    /// Served domain, overrides `dns.domain`.
    #[arg(long)]
    domain: Option<String>,

    /// Published server hostname, overrides `dns.hostname`.
    #[arg(long)]
    hostname: Option<String>,

    /// AWS region, overrides `ec2.region`.
    #[arg(long)]
    region: Option<String>,

    /// Listen address, overrides `dns.listen_addr`.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("INSTANCE_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("dns.domain", args.domain.clone())?
        .set_override_option("dns.hostname", args.hostname.clone())?
        .set_override_option("ec2.region", args.region.clone())?
        .set_override_option("dns.listen_addr", args.listen.map(|addr| addr.to_string()))?
        .build()?
        .try_deserialize()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        domain = %config.dns.domain,
        region = %config.ec2.region,
        "Starting instance-dns"
    );

    let source = match Ec2Source::new(&config.ec2).await {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to set up instance source: {}", e);
            return Err(e.into());
        }
    };
    let cache = InstanceCache::new(Arc::new(source), config.cache.ttl());

    // Setup graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    // Run DNS server
    let server = DnsServer::new(config.dns, config.cache, cache);
    let result = server.run(shutdown_rx).await;

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("instance-dns shutdown complete");
    Ok(())
}
