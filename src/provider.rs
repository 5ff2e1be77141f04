//! In-process simulated provider
//!
//! Lets the whole plan/apply cycle run without a cloud account. Ids look
//! like real ones (`vpc-0a1b2c3d4e5f60718`) and are derived from a blake3
//! digest, so they are unique per call but carry no meaning.

use crate::config::ProviderConfig;
use declarative::{Created, ErrorCategory, Provider, ProviderError, Value, Values};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ID_HEX_LEN: usize = 17;

/// Provider that fabricates ids and outputs
#[derive(Debug)]
pub struct SimulatedProvider {
    latency: Duration,
    fail_types: BTreeSet<String>,
    seed: u128,
    sequence: AtomicU64,
}

impl SimulatedProvider {
    /// Create a provider with the given behaviour
    pub fn new(config: &ProviderConfig) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self {
            latency: Duration::from_millis(config.latency_ms),
            fail_types: config.fail_types.iter().cloned().collect(),
            seed,
            sequence: AtomicU64::new(0),
        }
    }

    fn simulate(&self, operation: &str, resource_type: &str) -> Result<(), ProviderError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if self.fail_types.contains(resource_type) {
            return Err(ProviderError::new(
                ErrorCategory::Other,
                format!("simulated {operation} failure for {resource_type}"),
            ));
        }
        Ok(())
    }

    fn next_id(&self, resource_type: &str, attributes: &Values) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&sequence.to_le_bytes());
        hasher.update(resource_type.as_bytes());
        if let Ok(bytes) = serde_json::to_vec(attributes) {
            hasher.update(&bytes);
        }
        let hex = hasher.finalize().to_hex();
        format!("{}-{}", id_prefix(resource_type), &hex.as_str()[..ID_HEX_LEN])
    }
}

impl Provider for SimulatedProvider {
    fn create(&self, resource_type: &str, attributes: &Values) -> Result<Created, ProviderError> {
        self.simulate("create", resource_type)?;

        let provider_id = self.next_id(resource_type, attributes);
        let mut outputs = Values::new();
        outputs.insert("arn".into(), Value::String(arn(resource_type, &provider_id)));
        if resource_type.ends_with("_lb") {
            outputs.insert(
                "dns_name".into(),
                Value::String(format!("{provider_id}.elb.simulated.internal")),
            );
        }

        log::info!("Created {resource_type} {provider_id}");
        Ok(Created {
            provider_id,
            outputs,
        })
    }

    fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        changed: &Values,
    ) -> Result<Values, ProviderError> {
        self.simulate("update", resource_type)?;
        log::info!(
            "Updated {resource_type} {provider_id} ({})",
            changed.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(Values::new())
    }

    fn destroy(&self, resource_type: &str, provider_id: &str) -> Result<(), ProviderError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        log::info!("Destroyed {resource_type} {provider_id}");
        Ok(())
    }
}

/// Id prefix for a resource type: the vendor segment is dropped and well
/// known types use their usual short form.
pub fn id_prefix(resource_type: &str) -> &str {
    let kind = resource_type
        .split_once('_')
        .map_or(resource_type, |(_, rest)| rest);
    match kind {
        "instance" => "i",
        "internet_gateway" => "igw",
        "security_group" => "sg",
        "route_table" => "rtb",
        "eip" => "eipalloc",
        "" => "res",
        other => other.split('_').next().unwrap_or(other),
    }
}

fn arn(resource_type: &str, provider_id: &str) -> String {
    format!("arn:sim:{resource_type}:{provider_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn provider(fail_types: &[&str]) -> SimulatedProvider {
        SimulatedProvider::new(&ProviderConfig {
            latency_ms: 0,
            fail_types: fail_types.iter().map(|s| (*s).to_string()).collect(),
        })
    }

    #[test]
    fn test_id_prefix() {
        assert_eq!(id_prefix("aws_vpc"), "vpc");
        assert_eq!(id_prefix("aws_nat_gateway"), "nat");
        assert_eq!(id_prefix("aws_subnet"), "subnet");
        assert_eq!(id_prefix("aws_instance"), "i");
        assert_eq!(id_prefix("aws_internet_gateway"), "igw");
        assert_eq!(id_prefix("bucket"), "bucket");
    }

    #[test]
    fn test_create_assigns_unique_ids() {
        let provider = provider(&[]);
        let pattern = Regex::new(r"^vpc-[0-9a-f]{17}$").unwrap();

        let a = provider.create("aws_vpc", &Values::new()).unwrap();
        let b = provider.create("aws_vpc", &Values::new()).unwrap();
        assert!(pattern.is_match(&a.provider_id), "{}", a.provider_id);
        assert_ne!(a.provider_id, b.provider_id);
        assert_eq!(
            a.outputs["arn"],
            Value::String(format!("arn:sim:aws_vpc:{}", a.provider_id))
        );
    }

    #[test]
    fn test_lb_reports_dns_name() {
        let created = provider(&[]).create("aws_lb", &Values::new()).unwrap();
        assert!(created.outputs.contains_key("dns_name"));
    }

    #[test]
    fn test_fail_types_inject_failures() {
        let provider = provider(&["aws_nat_gateway"]);
        let err = provider.create("aws_nat_gateway", &Values::new()).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message.contains("aws_nat_gateway"));
        assert!(provider.update("aws_nat_gateway", "nat-1", &Values::new()).is_err());
        assert!(provider.destroy("aws_nat_gateway", "nat-1").is_ok());
        assert!(provider.create("aws_vpc", &Values::new()).is_ok());
    }
}
