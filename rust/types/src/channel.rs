//! Channel-name conventions shared across the control plane.
//!
//! A virtual dm channel is `<physical>_<collection>v<shard>`; its delta twin
//! carries the same suffix with the dml infix swapped for the delta infix.

use thiserror::Error;

/// Prefix of every data-mutation stream channel.
pub const DM_CHANNEL_PREFIX: &str = "quiver-dml";
/// Prefix of every derived delete stream channel.
pub const DELTA_CHANNEL_PREFIX: &str = "quiver-delta";

const QUERY_CHANNEL_PREFIX: &str = "quiver-query";
const QUERY_RESULT_CHANNEL_PREFIX: &str = "quiver-queryResult";

pub fn query_channel_name(collection_id: i64) -> String {
    format!("{}-{}", QUERY_CHANNEL_PREFIX, collection_id)
}

pub fn query_result_channel_name(collection_id: i64) -> String {
    format!("{}-{}", QUERY_RESULT_CHANNEL_PREFIX, collection_id)
}

#[derive(Debug, Error, PartialEq)]
#[error("channel {channel} does not contain expected prefix {prefix}")]
pub struct ChannelNameError {
    pub channel: String,
    pub prefix: String,
}

/// Rewrite a channel name from one prefix family to another, e.g. a dm
/// channel to its delta counterpart.
pub fn convert_channel_name(
    channel: &str,
    from_prefix: &str,
    to_prefix: &str,
) -> Result<String, ChannelNameError> {
    if !channel.starts_with(from_prefix) {
        return Err(ChannelNameError {
            channel: channel.to_string(),
            prefix: from_prefix.to_string(),
        });
    }
    Ok(format!("{}{}", to_prefix, &channel[from_prefix.len()..]))
}

/// Strip the per-collection suffix from a virtual channel, yielding the
/// physical channel actually provisioned at the stream broker.
pub fn to_physical_channel(virtual_channel: &str) -> &str {
    match virtual_channel.rfind('_') {
        Some(idx) => &virtual_channel[..idx],
        None => virtual_channel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_channel_name() {
        let delta = convert_channel_name(
            "quiver-dml_0_100v0",
            DM_CHANNEL_PREFIX,
            DELTA_CHANNEL_PREFIX,
        )
        .unwrap();
        assert_eq!(delta, "quiver-delta_0_100v0");

        let err =
            convert_channel_name("other-chan_0", DM_CHANNEL_PREFIX, DELTA_CHANNEL_PREFIX)
                .unwrap_err();
        assert_eq!(err.prefix, DM_CHANNEL_PREFIX);
    }

    #[test]
    fn test_to_physical_channel() {
        assert_eq!(to_physical_channel("quiver-dml_0_100v0"), "quiver-dml_0");
        assert_eq!(to_physical_channel("quiver-dml_1"), "quiver-dml");
        assert_eq!(to_physical_channel("bare"), "bare");
    }

    #[test]
    fn test_query_channel_names() {
        assert_eq!(query_channel_name(7), "quiver-query-7");
        assert_eq!(query_result_channel_name(7), "quiver-queryResult-7");
    }
}
