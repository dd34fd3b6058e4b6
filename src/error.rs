//! Error types for instance-dns.

use thiserror::Error;

/// Errors that stop the server from starting or serving.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (socket bind, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error (usually an unparsable domain or hostname)
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Instance source could not be set up or queried
    #[error("Instance source error: {0}")]
    Fetch(#[from] FetchError),
}

/// Failure to list instances from the cloud provider.
///
/// Always recoverable: the cache keeps serving its previous snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The provider API call failed (network, throttling, malformed response).
    #[error("instance listing failed: {0}")]
    Api(String),

    /// Credentials were missing or rejected.
    #[error("credentials rejected: {0}")]
    Credentials(String),
}

/// A question name that cannot be turned into a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryNameError {
    /// The name is not under the served domain.
    #[error("{name} is outside the served domain")]
    OutsideZone {
        /// The offending question name.
        name: String,
    },

    /// The name is under the served domain but does not match
    /// `[<n>.]<value>[.role].<domain>`.
    #[error("badly formed name {name}: {labels:?}")]
    Malformed {
        /// The offending question name.
        name: String,
        /// Labels left over after stripping the domain, role and ordinal.
        labels: Vec<String>,
    },
}
