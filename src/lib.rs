//! Instance DNS - An authoritative DNS server for cloud compute instances.
//!
//! This crate provides a DNS server that answers queries for a served domain
//! from a periodically refreshed, tag-indexed cache of EC2 instances instead
//! of a static zone file. Instances are indexed by their `Name` and `Role`
//! tags; the cache is rebuilt off to the side and swapped in atomically.
//!
//! ## Features
//!
//! - Periodic instance listing with atomic snapshot replacement
//! - A and CNAME answers with TTLs that decay towards the next refresh
//! - NS and SOA answers at the zone apex
//! - Ordinal selection of a single instance out of several sharing a tag
//! - Public or client-topology based address selection
//! - Graceful shutdown support
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         instance-dns                            │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                   │
//! │  │ Instance source  │───▶│  InstanceCache   │                   │
//! │  │ (DescribeInst.)  │    │  (snapshot)      │                   │
//! │  └──────────────────┘    └────────┬─────────┘                   │
//! │         ▲                         │                             │
//! │         │ every refresh           ▼                             │
//! │  ┌──────┴───────────┐    ┌──────────────────┐                   │
//! │  │    Refresher     │    │  QueryResolver   │                   │
//! │  └──────────────────┘    └────────┬─────────┘                   │
//! │                                   ▼                             │
//! │                          ┌──────────────────┐                   │
//! │                          │  Hickory DNS     │◀── UDP/TCP        │
//! │                          │  Server          │    :53            │
//! │                          └──────────────────┘                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! [<ordinal>.]<value>[.role].<domain>
//!
//! db.internal.example.com         → every instance tagged Name=db
//! web.role.internal.example.com   → every instance tagged Role=web
//! 2.web.role.internal.example.com → the second Role=web instance
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use instance_dns::ec2::Ec2Source;
//! use instance_dns::{Config, DnsServer, InstanceCache};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: Config = load_config()?;
//!     let source = Ec2Source::new(&config.ec2).await?;
//!     let cache = InstanceCache::new(Arc::new(source), config.cache.ttl());
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     DnsServer::new(config.dns, config.cache, cache)
//!         .run(shutdown_rx)
//!         .await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod cache;
pub mod config;
#[cfg(feature = "ec2")]
pub mod ec2;
pub mod error;
pub mod metrics;
pub mod refresher;
pub mod resolver;
pub mod server;
pub mod source;
pub mod telemetry;

// Re-export main types
pub use cache::InstanceCache;
pub use config::{
    AddressPolicy, CacheConfig, Config, DnsConfig, Ec2Config, SoaConfig, TelemetryConfig,
};
pub use error::{DnsError, FetchError};
pub use resolver::QueryResolver;
pub use server::DnsServer;
pub use source::{Instance, InstanceSource};
