use crate::time::SimTime;
use anyhow::anyhow;
use std::{collections::BTreeMap, fmt, str};

/// The identifier of one directional flow, assigned by the engine's
/// statistics collector.
///
/// The id is opaque and run-scoped: the harness never assumes ids are
/// sequential or 1-based, only that an id observed once keeps
/// designating the same flow for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct FlowId(u64);

impl FlowId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline(always)]
    pub const fn into_u64(self) -> u64 {
        self.0
    }
}

impl str::FromStr for FlowId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self).map_err(|error| anyhow!("{error}"))
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cumulative counters for one flow, as reported by the engine's
/// statistics query.
///
/// All counters are cumulative since the start of the run — the
/// [`DeltaTracker`] turns them into per-interval samples. The
/// timestamps are `None` until the flow has actually transmitted
/// (respectively delivered) its first packet.
///
/// [`DeltaTracker`]: crate::DeltaTracker
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowStats {
    /// cumulative bytes handed to the network by the sender
    pub tx_bytes: u64,
    /// cumulative bytes delivered to the receiver
    pub rx_bytes: u64,
    /// cumulative packets lost in transit
    pub lost_packets: u64,
    /// virtual time of the first transmitted packet
    pub first_tx: Option<SimTime>,
    /// virtual time of the last received packet
    pub last_rx: Option<SimTime>,
}

impl FlowStats {
    /// Aggregate goodput over the flow's whole lifetime, in Mbps:
    /// `rx_bytes * 8 / (last_rx - first_tx) / 1e6`.
    ///
    /// Returns `None` when the flow has no completed delivery — a
    /// missing timestamp, or a zero or negative elapsed time. The
    /// caller reports this as "undefined"; it is never `inf` and never
    /// a panic.
    ///
    /// # Example
    ///
    /// ```
    /// # use dumbbell_core::{FlowStats, SimTime};
    /// let degenerate = FlowStats {
    ///     rx_bytes: 1_000,
    ///     first_tx: Some(SimTime::from_secs(1)),
    ///     last_rx: Some(SimTime::from_secs(1)),
    ///     ..FlowStats::default()
    /// };
    /// assert_eq!(degenerate.goodput_mbps(), None);
    /// ```
    pub fn goodput_mbps(&self) -> Option<f64> {
        let first_tx = self.first_tx?;
        let last_rx = self.last_rx?;
        let elapsed = last_rx.elapsed_since(first_tx)?;
        if elapsed.is_zero() {
            return None;
        }
        Some(self.rx_bytes as f64 * 8.0 / elapsed.as_secs_f64() / 1e6)
    }
}

/// The engine's answer to one flow-statistics query.
///
/// `BTreeMap` keeps the iteration order deterministic. New flows may
/// appear between queries; flows never disappear during a run.
pub type FlowStatsSnapshot = BTreeMap<FlowId, FlowStats>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn print_and_parse() {
        assert_eq!(format!("{}", FlowId(42)), "42");
        assert_eq!("42".parse::<FlowId>().unwrap(), FlowId(42));
        assert!("nope".parse::<FlowId>().is_err());
    }

    #[test]
    fn goodput() {
        let stats = FlowStats {
            rx_bytes: 12_500_000, // 100 Mbit
            first_tx: Some(SimTime::ZERO),
            last_rx: Some(SimTime::from_secs(10)),
            ..FlowStats::default()
        };
        assert_eq!(stats.goodput_mbps(), Some(10.0));
    }

    #[test]
    fn goodput_undefined_without_timestamps() {
        assert_eq!(FlowStats::default().goodput_mbps(), None);

        let only_tx = FlowStats {
            first_tx: Some(SimTime::ZERO),
            ..FlowStats::default()
        };
        assert_eq!(only_tx.goodput_mbps(), None);
    }

    #[test]
    fn goodput_undefined_on_zero_or_negative_duration() {
        let t = SimTime::from_secs(5);
        let zero = FlowStats {
            rx_bytes: 1,
            first_tx: Some(t),
            last_rx: Some(t),
            ..FlowStats::default()
        };
        assert_eq!(zero.goodput_mbps(), None);

        let negative = FlowStats {
            rx_bytes: 1,
            first_tx: Some(t + Duration::from_secs(1)),
            last_rx: Some(t),
            ..FlowStats::default()
        };
        assert_eq!(negative.goodput_mbps(), None);
    }
}
