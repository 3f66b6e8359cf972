use std::num::{NonZeroU32, NonZeroU64};
use std::str::FromStr;
use std::sync::Arc;
use std::time;

use envconfig::Envconfig;

use crate::auth::AuthProvider;

pub const DEFAULT_FLOW_PERIOD_SECONDS: u64 = 30;
pub const DEFAULT_FLOW_PERMIT: u32 = 10;

pub const PULSAR_ADDR_CN: &str = "pulsar://mqe.tuyacn.com:7285";
pub const PULSAR_ADDR_EU: &str = "pulsar://mqe.tuyaeu.com:7285";
pub const PULSAR_ADDR_US: &str = "pulsar://mqe.tuyaus.com:7285";

#[derive(Envconfig, Clone, Debug)]
pub struct ClientConfig {
    #[envconfig(from = "PULSAR_ADDR", default = "pulsar://mqe.tuyacn.com:7285")]
    pub pulsar_addr: String,

    #[envconfig(default = "3000")]
    pub partition_lookup_timeout: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub new_consumer_timeout: EnvMsDuration,

    #[envconfig(default = "false")]
    pub tls_skip_verify: bool,

    // Capacity of the per-consumer channel carrying errors reported outside of a request.
    #[envconfig(default = "10")]
    pub async_error_capacity: usize,
}

impl ClientConfig {
    /// A config for `pulsar_addr` with every other setting at its default.
    pub fn new(pulsar_addr: &str) -> Self {
        Self {
            pulsar_addr: pulsar_addr.to_owned(),
            partition_lookup_timeout: EnvMsDuration(time::Duration::from_secs(3)),
            new_consumer_timeout: EnvMsDuration(time::Duration::from_secs(60)),
            tls_skip_verify: false,
            async_error_capacity: 10,
        }
    }

    pub fn for_region(region: Region) -> Self {
        Self::new(region.pulsar_addr())
    }
}

/// How many messages a partitioned consumer may handle per period, across all partitions.
#[derive(Envconfig, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowConfig {
    #[envconfig(default = "30")]
    pub flow_period_seconds: NonZeroU64,

    #[envconfig(default = "10")]
    pub flow_permit: NonZeroU32,
}

impl FlowConfig {
    pub fn new(flow_period_seconds: NonZeroU64, flow_permit: NonZeroU32) -> Self {
        Self {
            flow_period_seconds,
            flow_permit,
        }
    }

    pub fn period(&self) -> time::Duration {
        time::Duration::from_secs(self.flow_period_seconds.get())
    }

    pub fn permits(&self) -> usize {
        self.flow_permit.get() as usize
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            flow_period_seconds: NonZeroU64::new(DEFAULT_FLOW_PERIOD_SECONDS)
                .unwrap_or(NonZeroU64::MIN),
            flow_permit: NonZeroU32::new(DEFAULT_FLOW_PERMIT).unwrap_or(NonZeroU32::MIN),
        }
    }
}

/// Everything needed to subscribe to one logical topic.
#[derive(Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub auth: Arc<dyn AuthProvider>,
    pub flow: FlowConfig,
}

impl ConsumerConfig {
    pub fn new(topic: &str, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            topic: topic.to_owned(),
            auth,
            flow: FlowConfig::default(),
        }
    }

    pub fn with_flow(mut self, flow: FlowConfig) -> Self {
        self.flow = flow;
        self
    }
}

/// Regions with a known broker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    China,
    Europe,
    America,
}

impl Region {
    pub fn pulsar_addr(&self) -> &'static str {
        match self {
            Region::China => PULSAR_ADDR_CN,
            Region::Europe => PULSAR_ADDR_EU,
            Region::America => PULSAR_ADDR_US,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseRegionError(pub String);

impl FromStr for Region {
    type Err = ParseRegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "cn" => Ok(Region::China),
            "eu" => Ok(Region::Europe),
            "us" => Ok(Region::America),
            invalid => Err(ParseRegionError(invalid.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.pulsar_addr, PULSAR_ADDR_CN);
        assert_eq!(config.partition_lookup_timeout.0, time::Duration::from_secs(3));
        assert_eq!(config.new_consumer_timeout.0, time::Duration::from_secs(60));
        assert!(!config.tls_skip_verify);
        assert_eq!(config.async_error_capacity, 10);
    }

    #[test]
    fn test_client_config_overrides() {
        let env = HashMap::from([
            ("PULSAR_ADDR".to_owned(), "pulsar://localhost:6650".to_owned()),
            ("PARTITION_LOOKUP_TIMEOUT".to_owned(), "500".to_owned()),
            ("TLS_SKIP_VERIFY".to_owned(), "true".to_owned()),
        ]);
        let config = ClientConfig::init_from_hashmap(&env).unwrap();

        assert_eq!(config.pulsar_addr, "pulsar://localhost:6650");
        assert_eq!(
            config.partition_lookup_timeout.0,
            time::Duration::from_millis(500)
        );
        assert!(config.tls_skip_verify);
    }

    #[test]
    fn test_flow_config() {
        let config = FlowConfig::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config, FlowConfig::default());
        assert_eq!(config.period(), time::Duration::from_secs(30));
        assert_eq!(config.permits(), 10);

        let env = HashMap::from([("FLOW_PERMIT".to_owned(), "0".to_owned())]);
        assert!(FlowConfig::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn test_region_from_str() {
        assert_eq!("cn".parse::<Region>(), Ok(Region::China));
        assert_eq!("EU".parse::<Region>(), Ok(Region::Europe));
        assert_eq!(
            "mars".parse::<Region>(),
            Err(ParseRegionError("mars".to_owned()))
        );
        assert_eq!(
            ClientConfig::for_region(Region::America).pulsar_addr,
            PULSAR_ADDR_US
        );
    }
}
