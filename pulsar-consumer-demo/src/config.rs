use envconfig::Envconfig;
use pulsar_consumer::{ClientConfig, FlowConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub client: ClientConfig,

    #[envconfig(nested = true)]
    pub flow: FlowConfig,

    #[envconfig(default = "accessID")]
    pub access_id: String,

    #[envconfig(default = "accessKey")]
    pub access_token: String,

    // The demo runs against an in-process broker seeded with sample events.
    #[envconfig(default = "3")]
    pub demo_partitions: u32,

    #[envconfig(default = "20")]
    pub demo_messages: usize,
}
