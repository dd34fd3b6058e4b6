//! Shared test infrastructure for instance-dns integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{Catalog, MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use instance_dns::config::{AddressPolicy, DnsConfig, SoaConfig};
use instance_dns::server::build_catalog;
use instance_dns::{FetchError, Instance, InstanceCache, InstanceSource, QueryResolver};

// --- Constants ---

pub const DOMAIN: &str = "internal.example.com";
pub const HOSTNAME: &str = "ns1.example.com";
pub const TTL: Duration = Duration::from_secs(300);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to `Catalog::handle_request()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Instance source ---

/// In-memory instance listing that can be swapped between refreshes.
#[derive(Default)]
pub struct StaticSource {
    instances: Mutex<Vec<Instance>>,
}

impl StaticSource {
    pub fn new(instances: Vec<Instance>) -> Arc<Self> {
        Arc::new(Self {
            instances: Mutex::new(instances),
        })
    }

    pub fn set(&self, instances: Vec<Instance>) {
        *self.instances.lock().unwrap() = instances;
    }
}

#[async_trait]
impl InstanceSource for StaticSource {
    async fn list_instances(&self) -> Result<Vec<Instance>, FetchError> {
        Ok(self.instances.lock().unwrap().clone())
    }
}

// --- Instance builders ---

pub fn named(id: &str, name: &str, public_ip: &str, private_ip: &str) -> Instance {
    Instance {
        id: id.to_string(),
        tags: vec![("Name".to_string(), name.to_string())],
        public_ip: Some(public_ip.to_string()),
        private_ip: Some(private_ip.to_string()),
        public_dns_name: None,
    }
}

pub fn with_role(mut instance: Instance, role: &str) -> Instance {
    instance.tags.push(("Role".to_string(), role.to_string()));
    instance
}

pub fn with_dns_name(mut instance: Instance, dns_name: &str) -> Instance {
    instance.public_dns_name = Some(dns_name.to_string());
    instance
}

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        domain: DOMAIN.to_string(),
        hostname: HOSTNAME.to_string(),
        address_policy: AddressPolicy::PreferPublic,
        soa: SoaConfig::default(),
    }
}

/// Build a cache over `instances` and run one refresh.
pub async fn populated_cache(instances: Vec<Instance>) -> InstanceCache {
    let cache = InstanceCache::new(StaticSource::new(instances), TTL);
    cache.refresh().await.expect("refresh from static source");
    cache
}

/// Build a Catalog serving `DOMAIN` from `cache`.
pub fn test_catalog(config: &DnsConfig, cache: InstanceCache) -> Catalog {
    let resolver = QueryResolver::new(config, cache).expect("failed to create resolver");
    build_catalog(resolver)
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` with a crafted source address.
pub fn build_request(name: &str, record_type: RecordType, src: SocketAddr, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    Request::new(msg, src, Protocol::Udp)
}

pub fn public_src() -> SocketAddr {
    "203.0.113.10:40000".parse().unwrap()
}

pub fn private_src() -> SocketAddr {
    "10.1.2.3:40000".parse().unwrap()
}

// --- Response helpers ---

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(
    catalog: &Catalog,
    name: &str,
    record_type: RecordType,
    src: SocketAddr,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, src, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

/// Extract A addresses from the answer section.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected IPs.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_a_ips(msg);
    actual.sort();
    let mut expected: Vec<Ipv4Addr> = expected_ips.to_vec();
    expected.sort();
    assert_eq!(
        actual, expected,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}
