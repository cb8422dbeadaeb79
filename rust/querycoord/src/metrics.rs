//! The `GetMetrics` JSON contract. Only the `system_info` metric type is
//! supported; requests and payloads are plain JSON so operators can curl
//! them without proto tooling.

use quiver_types::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const METRIC_TYPE_KEY: &str = "metric_type";
pub const SYSTEM_INFO_METRICS: &str = "system_info";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("request is not valid JSON: {0}")]
    BadRequest(#[from] serde_json::Error),
    #[error("unsupported metric type {0}")]
    Unsupported(String),
    #[error("request is missing the {METRIC_TYPE_KEY} key")]
    MissingMetricType,
}

/// Parse the metric type out of a `GetMetrics` request payload.
pub fn parse_metric_type(request: &str) -> Result<String, MetricsError> {
    let value: serde_json::Value = serde_json::from_str(request)?;
    value
        .get(METRIC_TYPE_KEY)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(MetricsError::MissingMetricType)
}

pub fn system_info_request() -> String {
    serde_json::json!({ METRIC_TYPE_KEY: SYSTEM_INFO_METRICS }).to_string()
}

/// What a query node reports about itself through `GetMetrics`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeSystemInfo {
    pub node_id: NodeId,
    pub name: String,
    pub memory_usage: u64,
    pub memory_total: u64,
}

impl NodeSystemInfo {
    /// Usage rate in [0, 1]; a node reporting no capacity counts as full.
    pub fn memory_usage_rate(&self) -> f64 {
        if self.memory_total == 0 {
            return 1.0;
        }
        self.memory_usage as f64 / self.memory_total as f64
    }
}

/// The coordinator's own `system_info` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordSystemInfo {
    pub node_id: NodeId,
    pub name: String,
    pub collection_count: usize,
    pub segment_count: usize,
    pub connected_nodes: Vec<NodeSystemInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metric_type() {
        assert_eq!(
            parse_metric_type(&system_info_request()).unwrap(),
            SYSTEM_INFO_METRICS
        );
        assert!(matches!(
            parse_metric_type("{\"other\": 1}"),
            Err(MetricsError::MissingMetricType)
        ));
        assert!(parse_metric_type("not json").is_err());
    }

    #[test]
    fn test_usage_rate_guards_zero_capacity() {
        let info = NodeSystemInfo::default();
        assert_eq!(info.memory_usage_rate(), 1.0);
    }
}
