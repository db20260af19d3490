//! The surface of the external network-simulation engine.
//!
//! The engine itself — virtual clock integration, packet forwarding,
//! loss injection, the transport implementations — is a collaborator,
//! not part of this crate. The harness drives it exclusively through
//! the [`Engine`] trait and the typed [`ConnRef`]/[`QueueRef`] handles
//! obtained at construction time, so no textual configuration path is
//! ever rebuilt at a call site.

use crate::{
    flow::FlowStatsSnapshot,
    time::SimTime,
    topology::{CcAlgorithm, DumbbellSpec},
    trace::TraceRegistry,
};
use std::fmt;
use thiserror::Error;

/// Typed handle to one monitored sender connection.
///
/// Handed out by [`Engine::build_dumbbell`]; opaque to the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct ConnRef(u64);

impl ConnRef {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline(always)]
    pub const fn into_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Typed handle to one bottleneck-facing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct QueueRef(u64);

impl QueueRef {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline(always)]
    pub const fn into_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error returned by an engine configuration call.
///
/// All of these are fatal setup errors: they surface before the event
/// loop starts and are never retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine cannot provide the requested congestion-control
    /// algorithm.
    #[error("engine does not support congestion-control algorithm {algorithm}")]
    UnsupportedAlgorithm { algorithm: CcAlgorithm },
    /// A connection handle did not designate a known connection.
    #[error("unknown connection handle {conn}")]
    UnknownConnection { conn: ConnRef },
    /// The topology parameters were rejected by the engine.
    #[error("invalid topology: {reason}")]
    InvalidTopology { reason: String },
}

/// Handles returned by [`Engine::build_dumbbell`].
#[derive(Debug, Clone)]
pub struct DumbbellRefs {
    /// one connection per left (sending) leaf, in leaf order
    pub left_senders: Vec<ConnRef>,
    /// every queue that can manifest the bottleneck; the derived
    /// capacity is applied uniformly to all of them
    pub bottleneck_queues: Vec<QueueRef>,
}

/// The services the harness consumes from the network-simulation
/// engine.
///
/// Configuration calls (`set_*`, `build_dumbbell`) happen before the
/// event loop starts. During the run the harness invokes
/// [`advance`](Engine::advance) from the event loop to move the
/// engine's internal model forward, and the engine reports state
/// changes synchronously through the [`TraceRegistry`] it is handed.
/// [`flow_stats`](Engine::flow_stats) may be called at any time and
/// returns cumulative counters only.
pub trait Engine {
    /// Push the transport segment size used by every connection.
    fn set_segment_size(&mut self, bytes: u64);

    /// Construct the dumbbell: `spec.leaf_count` left leaves,
    /// as many right leaves, one bottleneck pair in between.
    fn build_dumbbell(&mut self, spec: &DumbbellSpec) -> Result<DumbbellRefs, EngineError>;

    /// Cap a bottleneck-facing queue at `segments` segments.
    ///
    /// Never called with zero — an uncomputable capacity means the
    /// queue is left unbounded instead.
    fn set_queue_capacity(&mut self, queue: QueueRef, segments: u64);

    /// Select the congestion-control algorithm for one sender.
    fn set_congestion_control(
        &mut self,
        conn: ConnRef,
        algorithm: CcAlgorithm,
    ) -> Result<(), EngineError>;

    /// Start the traffic generator attached to `conn`.
    fn start_traffic(&mut self, conn: ConnRef);

    /// Stop the traffic generator attached to `conn`.
    fn stop_traffic(&mut self, conn: ConnRef);

    /// Advance the engine's internal model to `now`, emitting a
    /// notification through `traces` for every monitored state
    /// variable that changed.
    fn advance(&mut self, now: SimTime, traces: &mut TraceRegistry);

    /// Cumulative per-flow counters for every flow observed so far.
    fn flow_stats(&self) -> FlowStatsSnapshot;
}
