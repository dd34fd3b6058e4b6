//! Custom Hickory DNS authority backed by the instance cache.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{LowerName, Name, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::metrics::{self, QueryResult, Timer};
use crate::resolver::{QueryResolver, Resolution};

/// Authority for the served domain, answering from [`QueryResolver`].
pub struct InstanceAuthority {
    origin: LowerName,
    resolver: QueryResolver,
}

impl InstanceAuthority {
    /// Create an authority for the resolver's domain.
    pub fn new(resolver: QueryResolver) -> Self {
        Self {
            origin: LowerName::new(resolver.origin()),
            resolver,
        }
    }

    /// Resolve a question against the cache.
    fn resolve(&self, name: &LowerName, rtype: RecordType, client: Option<IpAddr>) -> Resolution {
        let name = Name::from(name.clone());
        self.resolver.resolve_at(&name, rtype, client, Instant::now())
    }
}

/// Shape a resolution for the catalog.
///
/// An empty answer inside the zone maps to `NameExists`, which the catalog
/// turns into NOERROR with the SOA in the authority section.
fn into_lookup(
    resolution: Resolution,
    lookup_options: LookupOptions,
) -> LookupControlFlow<LookupRecords> {
    if resolution.answers.is_empty() {
        return match resolution.outcome {
            QueryResult::OutsideZone => {
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::Refused)))
            }
            _ => LookupControlFlow::Break(Err(LookupError::NameExists)),
        };
    }

    let record_sets = resolution
        .answers
        .into_iter()
        .map(|record| Arc::new(single_record_set(record)))
        .collect();
    LookupControlFlow::Break(Ok(LookupRecords::many(lookup_options, record_sets)))
}

/// Wrap one record in its own set so CNAMEs for distinct instances are not
/// collapsed and mixed CNAME/A answers keep their order.
fn single_record_set(record: Record) -> RecordSet {
    let mut record_set = RecordSet::new(record.name().clone(), record.record_type(), 0);
    record_set.insert(record, 0);
    record_set
}

#[async_trait]
impl Authority for InstanceAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        into_lookup(self.resolve(name, rtype, None), lookup_options)
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        debug!(
            rtype = %request_info.query.query_type(),
            name = %request_info.query.name(),
            src = %request_info.src,
            id = request_info.header.id(),
            "query"
        );

        // Only client questions are counted; the catalog also calls `lookup`
        // internally for the SOA of negative responses.
        let timer = Timer::start();
        let rtype = request_info.query.query_type();
        let resolution = self.resolve(
            request_info.query.name(),
            rtype,
            Some(request_info.src.ip()),
        );
        metrics::record_query(&rtype.to_string(), resolution.outcome, timer.elapsed());

        if resolution.answers.is_empty() {
            debug!(outcome = ?resolution.outcome, "no answers");
        } else {
            debug!(count = resolution.answers.len(), "returning answers");
            metrics::record_answers_returned(resolution.answers.len());
        }

        into_lookup(resolution, lookup_options)
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates not supported
        Err(ResponseCode::NotImp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{make_instance, FixedSource};
    use crate::cache::{InstanceCache, Snapshot};
    use crate::config::{AddressPolicy, DnsConfig, SoaConfig};
    use crate::metrics::tests::{capture, counter_value};
    use hickory_proto::op::{Header, LowerQuery, Query};
    use hickory_proto::rr::RData;
    use hickory_server::proto::xfer::Protocol;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;

    fn test_config(policy: AddressPolicy) -> DnsConfig {
        DnsConfig {
            listen_addr: "127.0.0.1:5353".parse().unwrap(),
            domain: "internal.example.com".to_string(),
            hostname: "ns1.example.com".to_string(),
            address_policy: policy,
            soa: SoaConfig::default(),
        }
    }

    fn test_authority(policy: AddressPolicy) -> InstanceAuthority {
        let cache = InstanceCache::new(FixedSource::new(vec![]), Duration::from_secs(300));
        cache.replace(Snapshot::build(
            &[
                make_instance("i-1", &[("Name", "db")], Some("1.2.3.4"), Some("10.0.0.1"), None),
                make_instance(
                    "i-2",
                    &[("Name", "www")],
                    Some("5.6.7.8"),
                    None,
                    Some("ec2-5-6-7-8.compute-1.amazonaws.com"),
                ),
            ],
            Instant::now(),
            Duration::from_secs(300),
        ));
        let resolver = QueryResolver::new(&test_config(policy), cache).unwrap();
        InstanceAuthority::new(resolver)
    }

    fn lower(name: &str) -> LowerName {
        Name::from_ascii(name).unwrap().into()
    }

    fn a_addrs(lookup: &LookupRecords) -> Vec<Ipv4Addr> {
        lookup
            .iter()
            .filter_map(|r| match r.data() {
                RData::A(a) => Some(Ipv4Addr::from(*a)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_lookup_a_returns_record() {
        let authority = test_authority(AddressPolicy::PreferPublic);

        let result = authority
            .lookup(&lower("db.internal.example.com."), RecordType::A, LookupOptions::default())
            .await;

        match result {
            LookupControlFlow::Break(Ok(lookup)) => {
                assert_eq!(a_addrs(&lookup), vec![Ipv4Addr::new(1, 2, 3, 4)]);
            }
            _ => panic!("expected records"),
        }
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_name_exists() {
        let authority = test_authority(AddressPolicy::PreferPublic);

        let result = authority
            .lookup(&lower("nope.internal.example.com."), RecordType::A, LookupOptions::default())
            .await;

        assert!(matches!(
            result,
            LookupControlFlow::Break(Err(LookupError::NameExists))
        ));
    }

    #[tokio::test]
    async fn test_lookup_cname() {
        let authority = test_authority(AddressPolicy::PreferPublic);

        let result = authority
            .lookup(&lower("www.internal.example.com."), RecordType::A, LookupOptions::default())
            .await;

        match result {
            LookupControlFlow::Break(Ok(lookup)) => {
                let types: Vec<RecordType> = lookup.iter().map(|r| r.record_type()).collect();
                assert_eq!(types, vec![RecordType::CNAME]);
            }
            _ => panic!("expected CNAME"),
        }
    }

    #[tokio::test]
    async fn test_lookup_soa() {
        let authority = test_authority(AddressPolicy::PreferPublic);

        let result = authority
            .lookup(&lower("internal.example.com."), RecordType::SOA, LookupOptions::default())
            .await;

        assert!(matches!(result, LookupControlFlow::Break(Ok(_))));
    }

    #[tokio::test]
    async fn test_lookup_ns() {
        let authority = test_authority(AddressPolicy::PreferPublic);

        let result = authority
            .lookup(&lower("internal.example.com."), RecordType::NS, LookupOptions::default())
            .await;

        assert!(matches!(result, LookupControlFlow::Break(Ok(_))));
    }

    #[tokio::test]
    async fn test_zone_properties() {
        let authority = test_authority(AddressPolicy::PreferPublic);
        assert!(!authority.is_axfr_allowed());
        assert_eq!(authority.zone_type(), ZoneType::Primary);
        assert_eq!(authority.origin(), &lower("internal.example.com."));
    }

    fn make_request_info<'a>(
        src: SocketAddr,
        header: &'a Header,
        query: &'a LowerQuery,
    ) -> RequestInfo<'a> {
        RequestInfo::new(src, Protocol::Udp, header, query)
    }

    #[tokio::test]
    async fn test_search_passes_client_address() {
        let authority = test_authority(AddressPolicy::ClientTopology);
        let query = LowerQuery::from(Query::query(
            Name::from_ascii("db.internal.example.com.").unwrap(),
            RecordType::A,
        ));
        let header = Header::new();

        let private_src: SocketAddr = "10.9.9.9:5353".parse().unwrap();
        let result = authority
            .search(make_request_info(private_src, &header, &query), LookupOptions::default())
            .await;
        match result {
            LookupControlFlow::Break(Ok(lookup)) => {
                assert_eq!(a_addrs(&lookup), vec![Ipv4Addr::new(10, 0, 0, 1)]);
            }
            _ => panic!("expected records"),
        }

        let public_src: SocketAddr = "203.0.113.5:5353".parse().unwrap();
        let result = authority
            .search(make_request_info(public_src, &header, &query), LookupOptions::default())
            .await;
        match result {
            LookupControlFlow::Break(Ok(lookup)) => {
                assert_eq!(a_addrs(&lookup), vec![Ipv4Addr::new(1, 2, 3, 4)]);
            }
            _ => panic!("expected records"),
        }
    }

    #[test]
    fn test_only_client_questions_are_counted() {
        let authority = test_authority(AddressPolicy::PreferPublic);
        let query = LowerQuery::from(Query::query(
            Name::from_ascii("nope.internal.example.com.").unwrap(),
            RecordType::A,
        ));
        let header = Header::new();
        let src: SocketAddr = "203.0.113.5:5353".parse().unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let snapshotter = capture(|| {
            runtime.block_on(async {
                let result = authority
                    .search(make_request_info(src, &header, &query), LookupOptions::default())
                    .await;
                assert!(matches!(
                    result,
                    LookupControlFlow::Break(Err(LookupError::NameExists))
                ));

                // The catalog fetches the SOA for the negative response.
                let soa = authority.soa().await;
                assert!(matches!(soa, LookupControlFlow::Break(Ok(_))));
            })
        });

        let queries = "instance_dns.query.count";
        assert_eq!(counter_value(&snapshotter, queries, &[]), 1);
        assert_eq!(
            counter_value(&snapshotter, queries, &[("type", "A"), ("result", "no_data")]),
            1
        );
        assert_eq!(counter_value(&snapshotter, queries, &[("type", "SOA")]), 0);
    }
}
