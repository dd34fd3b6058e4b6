//! Instance listing interface.
//!
//! The cache only needs a full listing of instances with their tags and
//! addresses. Anything that can produce that (the EC2 API, a fixture in
//! tests) implements [`InstanceSource`].

use async_trait::async_trait;

use crate::error::FetchError;

/// One cloud instance as reported by the provider.
///
/// Address and DNS name fields are raw provider strings; the cache decides
/// what is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    /// Instance identifier, for logging only.
    pub id: String,
    /// `(key, value)` tag pairs.
    pub tags: Vec<(String, String)>,
    /// Public IPv4 address, if any.
    pub public_ip: Option<String>,
    /// Private IPv4 address, if any.
    pub private_ip: Option<String>,
    /// Public DNS name, if the provider publishes one.
    pub public_dns_name: Option<String>,
}

impl Instance {
    /// Value of the tag with the given key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Lists every instance visible to the server.
///
/// Implementations perform a single unfiltered listing per call and leave
/// retries to the refresh schedule.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    /// Fetch the full instance listing.
    async fn list_instances(&self) -> Result<Vec<Instance>, FetchError>;
}
