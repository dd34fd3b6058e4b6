//! Question-to-answer resolution.
//!
//! Names under the served domain follow this grammar:
//!
//! ```text
//! <name>.<domain>            all instances tagged Name=<name>
//! <role>.role.<domain>       all instances tagged Role=<role>
//! <n>.<name>.<domain>        n-th instance tagged Name=<name> (1-based)
//! <n>.<role>.role.<domain>   n-th instance tagged Role=<role>
//! ```
//!
//! The apex additionally answers NS and SOA. Everything else resolves to an
//! empty answer set; nothing here is ever surfaced as a protocol error.

use hickory_proto::rr::rdata::{A, CNAME, NS, SOA};
use hickory_proto::rr::{DNSClass, Name, RData, Record as ResourceRecord, RecordType};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::cache::{InstanceCache, LookupKey, LookupTag, Record};
use crate::config::{fqdn, AddressPolicy, DnsConfig, SoaConfig};
use crate::error::{DnsError, QueryNameError};
use crate::metrics::QueryResult;

/// TTL of the apex NS answer.
pub const NS_TTL: u32 = 300;

/// TTL of the synthesized SOA.
pub const SOA_TTL: u32 = 60;

/// Label that switches a lookup from the `Name` tag to the `Role` tag.
pub const ROLE_LABEL: &str = "role";

/// A question name reduced to a cache key and optional ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryName {
    /// Cache key to look up.
    pub key: LookupKey,
    /// 1-based position within the key's records; `None` selects all.
    pub ordinal: Option<usize>,
}

impl QueryName {
    /// Parse `name` relative to `domain`. Both are compared
    /// case-insensitively and may omit the trailing dot.
    pub fn parse(name: &str, domain: &str) -> Result<Self, QueryNameError> {
        let name = fqdn(name).to_ascii_lowercase();
        let domain = fqdn(domain).to_ascii_lowercase();

        let remainder = if name == domain {
            ""
        } else {
            match name.strip_suffix(&format!(".{}", domain)) {
                Some(remainder) => remainder,
                None => return Err(QueryNameError::OutsideZone { name: name.clone() }),
            }
        };

        let mut labels: Vec<&str> = remainder.split('.').collect();

        // web.role.<domain>
        let mut tag = LookupTag::Name;
        if labels.len() > 1 && labels.last() == Some(&ROLE_LABEL) {
            tag = LookupTag::Role;
            labels.pop();
        }

        // 2.web.<domain>
        let mut ordinal = None;
        if labels.len() > 1 {
            if let Ok(n) = labels[0].parse::<usize>() {
                if n > 0 {
                    ordinal = Some(n);
                    labels.remove(0);
                }
            }
        }

        match labels.as_slice() {
            [value] if !value.is_empty() => Ok(Self {
                key: LookupKey::new(tag, value),
                ordinal,
            }),
            _ => {
                let labels = labels.iter().map(|l| l.to_string()).collect();
                Err(QueryNameError::Malformed {
                    name: name.clone(),
                    labels,
                })
            }
        }
    }
}

/// Answers for one question plus how they came about.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Answer section records, in order.
    pub answers: Vec<ResourceRecord>,
    /// Outcome classification for logging and metrics.
    pub outcome: QueryResult,
}

impl Resolution {
    fn empty(outcome: QueryResult) -> Self {
        Self {
            answers: Vec::new(),
            outcome,
        }
    }

    fn answered(answers: Vec<ResourceRecord>) -> Self {
        let outcome = if answers.is_empty() {
            QueryResult::NoData
        } else {
            QueryResult::Answered
        };
        Self { answers, outcome }
    }
}

/// Turns DNS questions into answer records using the instance cache.
#[derive(Debug, Clone)]
pub struct QueryResolver {
    cache: InstanceCache,
    /// Served domain, lowercase with trailing dot.
    domain: String,
    origin: Name,
    hostname: Name,
    rname: Name,
    soa: SoaConfig,
    address_policy: AddressPolicy,
}

impl QueryResolver {
    /// Create a resolver for the configured domain.
    ///
    /// Fails if the domain, hostname or SOA mailbox is not a valid DNS name.
    pub fn new(config: &DnsConfig, cache: InstanceCache) -> Result<Self, DnsError> {
        let domain = config.fqdn_domain().to_ascii_lowercase();
        if domain == "." {
            return Err(DnsError::Config("domain must not be empty".to_string()));
        }
        if config.hostname.trim().is_empty() {
            return Err(DnsError::Config("hostname must not be empty".to_string()));
        }

        Ok(Self {
            origin: Name::from_ascii(&domain)?,
            hostname: Name::from_ascii(config.fqdn_hostname())?,
            rname: Name::from_ascii(config.fqdn_rname())?,
            domain,
            soa: config.soa.clone(),
            address_policy: config.address_policy,
            cache,
        })
    }

    /// Served domain as a DNS name.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// The cache lookups go to.
    pub fn cache(&self) -> &InstanceCache {
        &self.cache
    }

    /// Answer records for one question.
    pub fn answer(&self, name: &Name, rtype: RecordType, client: Option<IpAddr>) -> Vec<ResourceRecord> {
        self.resolve_at(name, rtype, client, Instant::now()).answers
    }

    /// Resolve one question as of `now`.
    pub fn resolve_at(
        &self,
        name: &Name,
        rtype: RecordType,
        client: Option<IpAddr>,
        now: Instant,
    ) -> Resolution {
        let qname = fqdn(&name.to_ascii()).to_ascii_lowercase();
        let is_apex = qname == self.domain;

        match rtype {
            RecordType::NS => {
                return match is_apex {
                    true => Resolution::answered(vec![self.ns_record()]),
                    false => Resolution::empty(QueryResult::NoData),
                };
            }
            RecordType::SOA => {
                return match is_apex {
                    true => Resolution::answered(vec![self.soa_record()]),
                    false => Resolution::empty(QueryResult::NoData),
                };
            }
            _ => {}
        }

        let query = match QueryName::parse(&qname, &self.domain) {
            Ok(query) => query,
            Err(e @ QueryNameError::OutsideZone { .. }) => {
                debug!(error = %e, "ignoring question outside served domain");
                return Resolution::empty(QueryResult::OutsideZone);
            }
            Err(e @ QueryNameError::Malformed { .. }) => {
                warn!(error = %e, rtype = ?rtype, "malformed question name");
                return Resolution::empty(QueryResult::Malformed);
            }
        };

        let records = self.select(&query);
        if records.is_empty() {
            debug!(key = %query.key, ordinal = ?query.ordinal, "no instances found");
            return Resolution::empty(QueryResult::NoData);
        }

        let mut owner = name.clone();
        owner.set_fqdn(true);

        let answers = records
            .iter()
            .filter_map(|record| self.synthesize(&owner, record, rtype, client, now))
            .collect();

        Resolution::answered(answers)
    }

    /// Look up the key and apply the ordinal selector.
    fn select(&self, query: &QueryName) -> Vec<Arc<Record>> {
        let mut records = self.cache.lookup(&query.key);

        // Ordinal 0 selects everything, like no ordinal at all.
        if let Some(n) = query.ordinal.filter(|n| *n > 0) {
            if n > records.len() {
                records.clear();
            } else {
                records = vec![records.swap_remove(n - 1)];
            }
        }

        records
    }

    /// One answer for one cached record, if it has anything for `rtype`.
    fn synthesize(
        &self,
        owner: &Name,
        record: &Record,
        rtype: RecordType,
        client: Option<IpAddr>,
        now: Instant,
    ) -> Option<ResourceRecord> {
        let ttl = record.ttl(now);

        // A CNAME stands in for every type at this name.
        if let Some(ref cname) = record.cname {
            return Some(build_record(owner.clone(), ttl, RData::CNAME(CNAME(cname.clone()))));
        }

        if rtype != RecordType::A {
            return None;
        }

        let address = self.address_for(record, client)?;
        Some(build_record(owner.clone(), ttl, RData::A(A::from(address))))
    }

    /// Pick the address to publish for `record` according to the policy.
    fn address_for(&self, record: &Record, client: Option<IpAddr>) -> Option<Ipv4Addr> {
        let prefer_private = match self.address_policy {
            AddressPolicy::PreferPublic => false,
            AddressPolicy::ClientTopology => client.is_some_and(is_private_client),
        };

        if prefer_private {
            record.private_ip.or(record.public_ip)
        } else {
            record.public_ip.or(record.private_ip)
        }
    }

    /// NS record pointing the apex at this server.
    pub fn ns_record(&self) -> ResourceRecord {
        build_record(
            self.origin.clone(),
            NS_TTL,
            RData::NS(NS(self.hostname.clone())),
        )
    }

    /// SOA record for the apex. The serial is the current Unix time.
    pub fn soa_record(&self) -> ResourceRecord {
        let serial = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();

        let soa = SOA::new(
            self.hostname.clone(),
            self.rname.clone(),
            serial,
            self.soa.refresh as i32,
            self.soa.retry as i32,
            self.soa.expire as i32,
            self.soa.minimum,
        );

        build_record(self.origin.clone(), SOA_TTL, RData::SOA(soa))
    }
}

fn build_record(name: Name, ttl: u32, rdata: RData) -> ResourceRecord {
    let mut record = ResourceRecord::from_rdata(name, ttl, rdata);
    record.set_dns_class(DNSClass::IN);
    record
}

/// Whether a client sits on a private network (RFC 1918 or loopback).
fn is_private_client(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| v4.is_private() || v4.is_loopback())
        }
    }
}
