//! DNS server setup and lifecycle management.

use hickory_proto::rr::LowerName;
use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::ServerFuture;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::authority::InstanceAuthority;
use crate::cache::InstanceCache;
use crate::config::{CacheConfig, DnsConfig};
use crate::error::DnsError;
use crate::refresher::Refresher;
use crate::resolver::QueryResolver;

/// Interval for emitting cache metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

const CAPABILITIES_HINT: &str = "binding a privileged port requires CAP_NET_BIND_SERVICE: \
     run `sudo setcap cap_net_bind_service=+ep \"$(which instance-dns)\"` or run as root";

/// Periodically emit cache metrics.
async fn metrics_loop(cache: InstanceCache, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                cache.emit_metrics();
                debug!(keys = cache.size(), "emitted cache metrics");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("metrics loop shutting down");
                    return;
                }
            }
        }
    }
}

/// Build a catalog serving the resolver's domain.
pub fn build_catalog(resolver: QueryResolver) -> Catalog {
    let origin = LowerName::new(resolver.origin());
    let authority = InstanceAuthority::new(resolver);
    let authority: Arc<dyn AuthorityObject> = Arc::new(authority);

    let mut catalog = Catalog::new();
    catalog.upsert(origin, vec![authority]);
    catalog
}

fn bind_error(addr: std::net::SocketAddr, e: io::Error) -> DnsError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        error!(%addr, "{}", CAPABILITIES_HINT);
    }
    DnsError::Io(e)
}

/// DNS server answering from the instance cache.
pub struct DnsServer {
    config: DnsConfig,
    cache_config: CacheConfig,
    cache: InstanceCache,
}

impl DnsServer {
    /// Create a new DNS server around an already constructed cache.
    pub fn new(config: DnsConfig, cache_config: CacheConfig, cache: InstanceCache) -> Self {
        Self {
            config,
            cache_config,
            cache,
        }
    }

    /// Get a reference to the instance cache.
    pub fn cache(&self) -> &InstanceCache {
        &self.cache
    }

    /// Run the DNS server until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), DnsError> {
        info!(
            listen_addr = %self.config.listen_addr,
            domain = %self.config.fqdn_domain(),
            hostname = %self.config.fqdn_hostname(),
            policy = ?self.config.address_policy,
            "Starting instance-dns server"
        );

        // Validate names before touching the network.
        let resolver = QueryResolver::new(&self.config, self.cache.clone())?;

        // An empty cache is served if the first listing fails; the refresh
        // task fills it on a later cycle.
        let refresher = Refresher::new(self.cache.clone(), self.cache_config.refresh_interval());
        match refresher.refresh_once().await {
            Ok(()) => info!(keys = self.cache.size(), "Initial instance listing complete"),
            Err(_) => warn!("Initial instance listing failed, serving an empty cache until the next refresh"),
        }

        let catalog = build_catalog(resolver);
        let mut server = ServerFuture::new(catalog);

        // Bind UDP
        let addr = self.config.listen_addr;
        let udp_socket = UdpSocket::bind(addr).await.map_err(|e| bind_error(addr, e))?;
        info!(%addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(addr).await.map_err(|e| bind_error(addr, e))?;
        info!(%addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        info!(
            domain = %self.config.fqdn_domain(),
            "DNS server ready to serve queries"
        );

        // Background tasks start only once both listeners are bound.
        let refresh_handle = tokio::spawn(refresher.run(shutdown.clone()));

        // Start metrics loop
        let metrics_handle = tokio::spawn(metrics_loop(self.cache.clone(), shutdown.clone()));
        self.cache.emit_metrics();

        let mut shutdown = shutdown;
        serve_until_shutdown(&mut server, &mut shutdown, vec![metrics_handle, refresh_handle]).await
    }
}

/// Serve until shutdown is signalled or the server itself stops, then wind
/// down the background `tasks`.
///
/// The tasks only watch the shutdown channel, so they are aborted when the
/// server stops on its own.
async fn serve_until_shutdown(
    server: &mut ServerFuture<Catalog>,
    shutdown: &mut watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
) -> Result<(), DnsError> {
    let result = tokio::select! {
        _ = wait_for_shutdown(shutdown) => {
            info!("DNS server shutdown requested");
            Ok(())
        }
        result = server.block_until_done() => {
            for task in &tasks {
                task.abort();
            }
            match result {
                Ok(()) => {
                    warn!("DNS server stopped without a shutdown request");
                    Ok(())
                }
                Err(e) => {
                    error!("DNS server error: {}", e);
                    Err(DnsError::Proto(e))
                }
            }
        }
    };

    info!("Waiting for background tasks to stop...");
    for task in tasks {
        let _ = task.await;
    }

    info!("DNS server stopped");
    result
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
