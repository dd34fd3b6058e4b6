//! Configuration types for instance-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Instance cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// EC2 instance source configuration.
    #[serde(default)]
    pub ec2: Ec2Config,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Served domain (e.g., "internal.example.com").
    /// Instance names are subdomains of this.
    pub domain: String,

    /// Hostname this server is published under. Used as the NS target and
    /// the SOA primary nameserver.
    pub hostname: String,

    /// Which instance address to hand out in A answers.
    #[serde(default)]
    pub address_policy: AddressPolicy,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

impl DnsConfig {
    /// Served domain with a trailing dot.
    pub fn fqdn_domain(&self) -> String {
        fqdn(&self.domain)
    }

    /// Server hostname with a trailing dot.
    pub fn fqdn_hostname(&self) -> String {
        fqdn(&self.hostname)
    }

    /// SOA mailbox with a trailing dot, defaulting to `hostmaster.<domain>`.
    pub fn fqdn_rname(&self) -> String {
        match self.soa.rname {
            Some(ref rname) => fqdn(rname),
            None => format!("hostmaster.{}", self.fqdn_domain()),
        }
    }
}

/// Normalize a DNS name so it always ends with a label separator.
pub fn fqdn(name: &str) -> String {
    let name = name.trim();
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Address selection policy for A answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressPolicy {
    /// Always answer with the public address, falling back to private.
    #[default]
    PreferPublic,
    /// Answer private clients (RFC 1918, loopback) with the private address
    /// and everyone else with the public one, each falling back to the other.
    ClientTopology,
}

/// Instance cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a snapshot is considered fresh, in seconds. Advertised
    /// TTLs count down to zero over this window (floored at 10s).
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// How often to re-list instances, in seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl CacheConfig {
    /// Snapshot freshness window.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Refresh period.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

/// EC2 instance source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ec2Config {
    /// AWS region to list instances in.
    #[serde(default = "default_region")]
    pub region: String,

    /// Static access key. When unset the default AWS credential chain is used.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Static secret key, paired with `access_key_id`.
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl Default for Ec2Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "instance_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

/// SOA (Start of Authority) record configuration.
///
/// The primary nameserver is always the configured hostname.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    /// Admin mailbox in DNS format (e.g., "admin.example.com" for admin@example.com).
    #[serde(default)]
    pub rname: Option<String>,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Minimum (negative caching) TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            rname: None,
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 53))
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refresh() -> u32 {
    86400
}

fn default_retry() -> u32 {
    7200
}

fn default_expire() -> u32 {
    86400
}

fn default_minimum() -> u32 {
    60
}
