use std::cmp::Ordering;
use std::fmt;

/// An opaque, monotonically comparable cursor into a virtual channel's
/// message stream. `msg_id` is transport-defined and compared byte-wise only
/// for equality/dedup keys (e.g. `(segmentID, position.msg_id)` in the
/// rendezvous flush manager); `timestamp` is the logical clock used for
/// ordering, since the transport guarantees timestamps are monotonic with
/// delivery order per channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChannelPosition {
    pub channel_name: String,
    pub msg_id: Vec<u8>,
    pub timestamp: u64,
}

impl ChannelPosition {
    pub fn new(channel_name: impl Into<String>, msg_id: Vec<u8>, timestamp: u64) -> Self {
        Self {
            channel_name: channel_name.into(),
            msg_id,
            timestamp,
        }
    }

    pub fn zero(channel_name: impl Into<String>) -> Self {
        Self::new(channel_name, Vec::new(), 0)
    }
}

impl fmt::Display for ChannelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}({})",
            self.channel_name,
            self.timestamp,
            hex_prefix(&self.msg_id)
        )
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl PartialOrd for ChannelPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_by_timestamp_only() {
        let a = ChannelPosition::new("c1", vec![1], 10);
        let b = ChannelPosition::new("c1", vec![2], 20);
        assert!(a < b);
        assert_ne!(a, b);
    }
}
