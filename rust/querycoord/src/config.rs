use quiver_broker::BrokerConfig;
use quiver_config::helpers::{
    deserialize_duration_from_millis, deserialize_duration_from_seconds,
};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryCoordConfig {
    #[serde(default = "QueryCoordConfig::default_service_name")]
    pub service_name: String,
    /// The coordinator's node id within the deployment.
    #[serde(default = "QueryCoordConfig::default_node_id")]
    pub node_id: i64,
    pub etcd: EtcdConfig,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub node_client: NodeClientConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
    #[serde(default)]
    pub task: TaskConfig,
}

impl QueryCoordConfig {
    fn default_service_name() -> String {
        "quiver-querycoord".to_string()
    }

    fn default_node_id() -> i64 {
        1
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    #[serde(default = "EtcdConfig::default_root_path")]
    pub root_path: String,
}

impl EtcdConfig {
    fn default_root_path() -> String {
        "quiver".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeClientConfig {
    #[serde(
        rename = "connect_timeout_ms",
        deserialize_with = "deserialize_duration_from_millis",
        default = "NodeClientConfig::default_connect_timeout"
    )]
    pub connect_timeout: Duration,
    #[serde(
        rename = "request_timeout_ms",
        deserialize_with = "deserialize_duration_from_millis",
        default = "NodeClientConfig::default_request_timeout"
    )]
    pub request_timeout: Duration,
}

impl NodeClientConfig {
    fn default_connect_timeout() -> Duration {
        Duration::from_millis(5000)
    }

    fn default_request_timeout() -> Duration {
        Duration::from_millis(10000)
    }
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        NodeClientConfig {
            connect_timeout: Self::default_connect_timeout(),
            request_timeout: Self::default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceConfig {
    /// Rebalance when the spread between the hottest and coolest node's
    /// memory usage rate exceeds this many percentage points.
    #[serde(default = "BalanceConfig::default_memory_usage_max_difference")]
    pub memory_usage_max_difference_percentage: u64,
    /// Never balance a segment onto a node this full.
    #[serde(default = "BalanceConfig::default_overloaded_threshold")]
    pub overloaded_memory_threshold_percentage: u64,
    #[serde(
        rename = "balance_interval_seconds",
        deserialize_with = "deserialize_duration_from_seconds",
        default = "BalanceConfig::default_balance_interval"
    )]
    pub balance_interval: Duration,
}

impl BalanceConfig {
    fn default_memory_usage_max_difference() -> u64 {
        30
    }

    fn default_overloaded_threshold() -> u64 {
        90
    }

    fn default_balance_interval() -> Duration {
        Duration::from_secs(60)
    }
}

impl Default for BalanceConfig {
    fn default() -> Self {
        BalanceConfig {
            memory_usage_max_difference_percentage:
                Self::default_memory_usage_max_difference(),
            overloaded_memory_threshold_percentage: Self::default_overloaded_threshold(),
            balance_interval: Self::default_balance_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Per-task retry budget for internal tasks; release tasks ignore it.
    #[serde(default = "TaskConfig::default_retry_budget")]
    pub retry_budget: i32,
    /// How long a placement request waits for a node to register before
    /// failing with NoAvailableNode.
    #[serde(
        rename = "wait_for_node_seconds",
        deserialize_with = "deserialize_duration_from_seconds",
        default = "TaskConfig::default_wait_for_node"
    )]
    pub wait_for_node: Duration,
}

impl TaskConfig {
    fn default_retry_budget() -> i32 {
        5
    }

    fn default_wait_for_node() -> Duration {
        Duration::from_secs(60)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            retry_budget: Self::default_retry_budget(),
            wait_for_node: Self::default_wait_for_node(),
        }
    }
}
