//! Tag-indexed instance cache.
//!
//! Instances are indexed by their `Name` and `Role` tags:
//! - `Name=<value>` is stored under `(Name, <value>)`
//! - `Role=<value>` is stored under `(Role, <value>)`
//!
//! Each refresh builds a complete [`Snapshot`] off to the side and swaps it
//! in under a short write lock. Readers clone the current `Arc<Snapshot>`
//! and never see a mix of two refreshes.

use hickory_proto::rr::Name;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::fqdn;
use crate::error::FetchError;
use crate::metrics::{self, RefreshResult, Timer};
use crate::source::{Instance, InstanceSource};

/// Smallest TTL ever advertised, even for records past `valid_until`.
pub const MIN_TTL: Duration = Duration::from_secs(10);

/// Tag key indexed as [`LookupTag::Name`].
pub const NAME_TAG: &str = "Name";

/// Tag key indexed as [`LookupTag::Role`].
pub const ROLE_TAG: &str = "Role";

/// Which tag a lookup is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupTag {
    /// `Name` tag.
    Name,
    /// `Role` tag.
    Role,
}

/// Cache key: a tag kind plus its lowercased value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    tag: LookupTag,
    value: String,
}

impl LookupKey {
    /// Build a key, lowercasing the value.
    pub fn new(tag: LookupTag, value: &str) -> Self {
        Self {
            tag,
            value: value.to_ascii_lowercase(),
        }
    }

    /// Key for a `Name` tag value.
    pub fn name(value: &str) -> Self {
        Self::new(LookupTag::Name, value)
    }

    /// Key for a `Role` tag value.
    pub fn role(value: &str) -> Self {
        Self::new(LookupTag::Role, value)
    }

    /// Tag kind.
    pub fn tag(&self) -> LookupTag {
        self.tag
    }

    /// Normalized tag value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            LookupTag::Name => write!(f, "name={}", self.value),
            LookupTag::Role => write!(f, "role={}", self.value),
        }
    }
}

/// DNS data for one instance.
///
/// Always carries at least one of `cname`, `public_ip` or `private_ip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Public DNS name. Takes priority over the addresses when answering.
    pub cname: Option<Name>,
    /// Public IPv4 address.
    pub public_ip: Option<Ipv4Addr>,
    /// Private IPv4 address.
    pub private_ip: Option<Ipv4Addr>,
    /// When the snapshot holding this record stops being fresh.
    pub valid_until: Instant,
}

impl Record {
    /// Build a record from a raw instance, or `None` if it has no usable
    /// endpoint. Unparsable addresses and names count as absent.
    pub fn from_instance(instance: &Instance, valid_until: Instant) -> Option<Self> {
        let record = Self {
            cname: instance
                .public_dns_name
                .as_deref()
                .and_then(parse_cname),
            public_ip: instance.public_ip.as_deref().and_then(parse_ipv4),
            private_ip: instance.private_ip.as_deref().and_then(parse_ipv4),
            valid_until,
        };

        if record.cname.is_none() && record.public_ip.is_none() && record.private_ip.is_none() {
            return None;
        }
        Some(record)
    }

    /// Seconds left until `valid_until`, never below [`MIN_TTL`].
    pub fn ttl(&self, now: Instant) -> u32 {
        let remaining = self.valid_until.saturating_duration_since(now).max(MIN_TTL);
        u32::try_from(remaining.as_secs()).unwrap_or(u32::MAX)
    }
}

fn parse_ipv4(raw: &str) -> Option<Ipv4Addr> {
    raw.trim().parse().ok()
}

fn parse_cname(raw: &str) -> Option<Name> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Name::from_ascii(fqdn(raw)).ok()
}

/// One complete, immutable mapping from lookup keys to records.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// key -> records in encounter order
    records: HashMap<LookupKey, Vec<Arc<Record>>>,

    /// Instances that produced a record.
    instances: usize,

    /// When this snapshot was built; `None` for the initial empty snapshot.
    built_at: Option<Instant>,
}

impl Snapshot {
    /// The empty snapshot a cache starts with.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from a full instance listing.
    ///
    /// Every record expires at `now + ttl`. An instance tagged with both
    /// `Name` and `Role` shares one record between the two keys.
    pub fn build(instances: &[Instance], now: Instant, ttl: Duration) -> Self {
        let valid_until = now + ttl;
        let mut records: HashMap<LookupKey, Vec<Arc<Record>>> = HashMap::new();
        let mut indexed = 0;

        for instance in instances {
            let keys: Vec<LookupKey> = instance
                .tags
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .filter_map(|(key, value)| match key.as_str() {
                    NAME_TAG => Some(LookupKey::name(value)),
                    ROLE_TAG => Some(LookupKey::role(value)),
                    _ => None,
                })
                .collect();

            if keys.is_empty() {
                continue;
            }

            let Some(record) = Record::from_instance(instance, valid_until) else {
                debug!(instance = %instance.id, "skipping instance without a usable endpoint");
                continue;
            };

            let record = Arc::new(record);
            for key in keys {
                records.entry(key).or_default().push(Arc::clone(&record));
            }
            indexed += 1;
        }

        Self {
            records,
            instances: indexed,
            built_at: Some(now),
        }
    }

    /// Records stored under `key`, in encounter order.
    pub fn get(&self, key: &LookupKey) -> &[Arc<Record>] {
        self.records.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no key is present.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of instances that contributed a record.
    pub fn instances(&self) -> usize {
        self.instances
    }

    /// Iterate over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &LookupKey> {
        self.records.keys()
    }

    /// Build time, `None` if no refresh has succeeded yet.
    pub fn built_at(&self) -> Option<Instant> {
        self.built_at
    }
}

/// Thread-safe cache of the latest instance snapshot.
#[derive(Clone)]
pub struct InstanceCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    source: Arc<dyn InstanceSource>,

    /// Freshness window stamped onto each record.
    ttl: Duration,

    /// Live snapshot. Write-locked only for the pointer swap.
    snapshot: RwLock<Arc<Snapshot>>,

    /// Serializes refreshes so at most one snapshot is being built.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCache")
            .field("ttl", &self.inner.ttl)
            .field("keys", &self.size())
            .finish()
    }
}

impl InstanceCache {
    /// Create an empty cache that refreshes from `source`.
    pub fn new(source: Arc<dyn InstanceSource>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                ttl,
                snapshot: RwLock::new(Arc::new(Snapshot::empty())),
                refresh_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Freshness window for new snapshots.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// List instances and install a new snapshot.
    ///
    /// On failure the current snapshot is left untouched.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        let _guard = self.inner.refresh_lock.lock().await;
        let timer = Timer::start();

        let instances = match self.inner.source.list_instances().await {
            Ok(instances) => instances,
            Err(e) => {
                metrics::record_refresh(RefreshResult::Failure, timer.elapsed());
                return Err(e);
            }
        };

        let snapshot = Snapshot::build(&instances, Instant::now(), self.inner.ttl);
        info!(
            listed = instances.len(),
            indexed = snapshot.instances(),
            keys = snapshot.len(),
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "refreshed instance cache"
        );
        metrics::record_cache_counts(snapshot.len(), snapshot.instances());
        self.replace(snapshot);
        metrics::record_refresh(RefreshResult::Success, timer.elapsed());

        Ok(())
    }

    /// Atomically install `snapshot` as the live one.
    pub fn replace(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        *self.inner.snapshot.write() = snapshot;
    }

    /// The live snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.snapshot.read())
    }

    /// Records stored under `key`; empty for unknown keys.
    pub fn lookup(&self, key: &LookupKey) -> Vec<Arc<Record>> {
        self.snapshot().get(key).to_vec()
    }

    /// Number of distinct keys in the live snapshot.
    pub fn size(&self) -> usize {
        self.inner.snapshot.read().len()
    }

    /// True once a refresh has succeeded.
    pub fn is_populated(&self) -> bool {
        self.inner.snapshot.read().built_at().is_some()
    }

    /// Emit current cache metrics.
    pub fn emit_metrics(&self) {
        let snapshot = self.snapshot();
        metrics::record_cache_counts(snapshot.len(), snapshot.instances());
        metrics::record_snapshot_age(snapshot.built_at().map(|t| t.elapsed()));
    }
}
