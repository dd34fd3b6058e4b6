//! EC2 `DescribeInstances` backed instance source.

use async_trait::async_trait;
use aws_sdk_ec2::config::{Credentials, Region};
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::Instance as Ec2Instance;
use aws_sdk_ec2::Client;
use tracing::{debug, info};

use crate::config::Ec2Config;
use crate::error::{DnsError, FetchError};
use crate::source::{Instance, InstanceSource};

/// Lists instances in one region through the EC2 API.
#[derive(Debug, Clone)]
pub struct Ec2Source {
    client: Client,
}

impl Ec2Source {
    /// Build a client for the configured region.
    ///
    /// Static keys are used when both halves are configured; otherwise the
    /// default AWS credential chain (environment, profile, instance role).
    ///
    /// An unrecognisable region or half-configured static keys are startup
    /// errors; nothing is sent to AWS until the first listing.
    pub async fn new(config: &Ec2Config) -> Result<Self, DnsError> {
        validate_region(&config.region)?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "instance-dns-config",
                );
                loader = loader.credentials_provider(credentials);
            }
            (None, None) => {}
            _ => {
                return Err(FetchError::Credentials(
                    "access_key_id and secret_access_key must be set together".to_string(),
                )
                .into());
            }
        }

        let sdk_config = loader.load().await;
        info!(region = %config.region, "EC2 instance source configured");

        Ok(Self {
            client: Client::new(&sdk_config),
        })
    }
}

/// Compass parts every AWS region name is built from.
const REGION_DIRECTIONS: &[&str] = &[
    "east",
    "west",
    "north",
    "south",
    "central",
    "northeast",
    "northwest",
    "southeast",
    "southwest",
];

/// Check that `region` looks like an AWS region name such as `us-east-1`,
/// `us-gov-west-1` or `ap-southeast-2`.
fn validate_region(region: &str) -> Result<(), DnsError> {
    let invalid = || DnsError::Config(format!("unknown AWS region {:?}", region));

    let parts: Vec<&str> = region.split('-').collect();
    let [geo, partition @ .., direction, number] = parts.as_slice() else {
        return Err(invalid());
    };

    let is_lower = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase());
    let geo_ok = (2..=4).contains(&geo.len()) && is_lower(*geo);
    let partition_ok = partition.len() <= 2 && partition.iter().all(|p| is_lower(*p));
    let direction_ok = REGION_DIRECTIONS.contains(direction);
    let number_ok = !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit());

    if geo_ok && partition_ok && direction_ok && number_ok {
        Ok(())
    } else {
        Err(invalid())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn convert_instance(instance: &Ec2Instance) -> Instance {
    let tags = instance
        .tags()
        .iter()
        .filter_map(|tag| Some((tag.key()?.to_string(), tag.value()?.to_string())))
        .collect();

    Instance {
        id: instance.instance_id().unwrap_or_default().to_string(),
        tags,
        public_ip: non_empty(instance.public_ip_address()),
        private_ip: non_empty(instance.private_ip_address()),
        public_dns_name: non_empty(instance.public_dns_name()),
    }
}

#[async_trait]
impl InstanceSource for Ec2Source {
    async fn list_instances(&self) -> Result<Vec<Instance>, FetchError> {
        let mut pages = self.client.describe_instances().into_paginator().send();
        let mut instances = Vec::new();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| FetchError::Api(DisplayErrorContext(&e).to_string()))?;
            for reservation in page.reservations() {
                instances.extend(reservation.instances().iter().map(convert_instance));
            }
        }

        debug!(count = instances.len(), "listed EC2 instances");
        Ok(instances)
    }
}
