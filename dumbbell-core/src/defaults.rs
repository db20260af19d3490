//! Compiled-in experiment parameters.
//!
//! Apart from the leaf count (a command-line flag in the driver),
//! every parameter of the experiment is a constant here.

use crate::{measure::Bandwidth, topology::CcAlgorithm};
use std::time::Duration;

/// Transport segment size in bytes.
///
/// Window-like trace quantities (congestion window, bytes in flight,
/// bytes in queue) are normalized to this unit.
pub const SEGMENT_SIZE: u64 = 1_448;

/// Number of leaf nodes on each side of the bottleneck.
pub const LEAF_COUNT: u32 = 2;

/// Rate of the shared bottleneck link.
///
/// ```
/// # use dumbbell_core::defaults::*;
/// assert_eq!(BOTTLENECK_BANDWIDTH.to_string(), "10mbps");
/// ```
pub const BOTTLENECK_BANDWIDTH: Bandwidth = Bandwidth::from_bits_per_sec(10_000_000);

/// One-way propagation delay of the bottleneck link.
pub const BOTTLENECK_DELAY: Duration = Duration::from_millis(80);

/// Rate of each leaf access link.
///
/// ```
/// # use dumbbell_core::defaults::*;
/// assert_eq!(LEAF_BANDWIDTH.to_string(), "100mbps");
/// ```
pub const LEAF_BANDWIDTH: Bandwidth = Bandwidth::from_bits_per_sec(100_000_000);

/// One-way propagation delay of each leaf access link.
pub const LEAF_DELAY: Duration = Duration::from_millis(10);

/// Per-packet receive error rate on the bottleneck link.
pub const ERROR_RATE: f64 = 0.0;

/// Multiplier applied to the bandwidth-delay product when sizing the
/// bottleneck queues.
pub const QUEUE_SCALING: f64 = 1.5;

/// Congestion-control algorithms assigned to the left leaves, in leaf
/// order. Leaves beyond this list keep the engine default.
pub const POLICIES: [CcAlgorithm; 2] = [CcAlgorithm::Bbr, CcAlgorithm::Cubic];

/// Virtual time the traffic generators run for.
pub const RUN_DURATION: Duration = Duration::from_secs(100);

/// Interval between periodic sampler firings.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between heartbeat progress reports.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Step the collaborating engine's internal model is advanced at.
pub const ENGINE_STEP: Duration = Duration::from_millis(10);

/// Smallest representable scheduling step; the event loop runs one
/// tick past the traffic stop time.
pub const EVENT_TICK: Duration = Duration::from_nanos(1);

/// Root directory receiving one timestamp-named directory per run.
pub const OUTPUT_ROOT: &str = "bbr-results";
