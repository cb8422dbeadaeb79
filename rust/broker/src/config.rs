use quiver_config::helpers::deserialize_duration_from_millis;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct GrpcBrokerConfig {
    pub root_coord_endpoint: String,
    pub data_coord_endpoint: String,
    pub index_coord_endpoint: String,
    #[serde(
        rename = "connect_timeout_ms",
        deserialize_with = "deserialize_duration_from_millis",
        default = "GrpcBrokerConfig::default_connect_timeout"
    )]
    pub connect_timeout: Duration,
    #[serde(
        rename = "request_timeout_ms",
        deserialize_with = "deserialize_duration_from_millis",
        default = "GrpcBrokerConfig::default_request_timeout"
    )]
    pub request_timeout: Duration,
}

impl GrpcBrokerConfig {
    fn default_connect_timeout() -> Duration {
        Duration::from_millis(5000)
    }

    // Every broker call is bounded by this; callers treat an expiry as a
    // transient failure.
    fn default_request_timeout() -> Duration {
        Duration::from_millis(10000)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrokerConfig {
    Grpc(GrpcBrokerConfig),
}
