//! Dumbbell topology construction and per-leaf congestion-control
//! policy assignment.

use crate::{
    defaults,
    engine::{DumbbellRefs, Engine, EngineError},
    measure::Bandwidth,
};
use anyhow::bail;
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;

/// Rate and one-way propagation delay of one point-to-point link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec {
    pub bandwidth: Bandwidth,
    pub delay: Duration,
}

/// Parameters of the symmetric dumbbell experiment topology:
/// `leaf_count` left leaves and as many right leaves, each attached by
/// a `leaf` link to its side's bottleneck router, the two routers
/// joined by the `bottleneck` link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DumbbellSpec {
    pub leaf_count: u32,
    pub leaf: LinkSpec,
    pub bottleneck: LinkSpec,
    /// per-packet receive error rate on the bottleneck link
    pub error_rate: f64,
    /// multiplier applied to the bandwidth-delay product when sizing
    /// the bottleneck queues
    pub queue_scaling: f64,
    /// transport segment size in bytes; also the unit window-like
    /// trace quantities are normalized to
    pub segment_size: u64,
}

impl Default for DumbbellSpec {
    fn default() -> Self {
        Self {
            leaf_count: defaults::LEAF_COUNT,
            leaf: LinkSpec {
                bandwidth: defaults::LEAF_BANDWIDTH,
                delay: defaults::LEAF_DELAY,
            },
            bottleneck: LinkSpec {
                bandwidth: defaults::BOTTLENECK_BANDWIDTH,
                delay: defaults::BOTTLENECK_DELAY,
            },
            error_rate: defaults::ERROR_RATE,
            queue_scaling: defaults::QUEUE_SCALING,
            segment_size: defaults::SEGMENT_SIZE,
        }
    }
}

/// A congestion-control algorithm a sending leaf can be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CcAlgorithm {
    Bbr,
    Cubic,
    Bic,
}

impl CcAlgorithm {
    /// the label used in output file names
    pub const fn label(self) -> &'static str {
        match self {
            Self::Bbr => "bbr",
            Self::Cubic => "cubic",
            Self::Bic => "bic",
        }
    }
}

impl fmt::Display for CcAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CcAlgorithm {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bbr" => Ok(Self::Bbr),
            "cubic" => Ok(Self::Cubic),
            "bic" => Ok(Self::Bic),
            other => bail!("unknown congestion-control algorithm `{other}'"),
        }
    }
}

/// Fatal configuration error, surfaced before the event loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("leaf count must be at least 1")]
    NoLeaves,
    #[error("segment size must be non-zero")]
    ZeroSegmentSize,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What [`configure`] produced: the engine handles plus the immutable
/// record of which leaf got which algorithm.
#[derive(Debug, Clone)]
pub struct DumbbellSetup {
    pub refs: DumbbellRefs,
    /// one entry per left leaf, in leaf order; `None` means the leaf
    /// kept the engine's default transport
    pub assignments: Vec<Option<CcAlgorithm>>,
    /// the capacity applied to every bottleneck queue, `None` when the
    /// scaled bandwidth-delay product truncated to zero (queues left
    /// unbounded)
    pub queue_capacity_segments: Option<u64>,
}

/// Bottleneck queue capacity derived from the bandwidth-delay product:
/// `bandwidth_bytes_per_sec * (2*bottleneck_delay + 2*leaf_delay) * scaling`,
/// expressed in segments.
///
/// Returns `None` when the scaled product truncates to zero segments —
/// a zero capacity would disable queue limiting entirely, so it must be
/// skipped, never applied.
///
/// # Example
///
/// ```
/// # use dumbbell_core::{queue_capacity_segments, DumbbellSpec};
/// let spec = DumbbellSpec::default();
/// // 10 Mbps bottleneck, 80 ms + 10 ms delays, x1.5 scaling
/// let capacity = queue_capacity_segments(&spec).unwrap();
/// assert!(capacity > 0);
/// ```
pub fn queue_capacity_segments(spec: &DumbbellSpec) -> Option<u64> {
    let round_trip = 2 * spec.bottleneck.delay + 2 * spec.leaf.delay;
    let capacity_bytes =
        spec.bottleneck.bandwidth.bytes_per_sec() as f64 * round_trip.as_secs_f64();
    let segments = (capacity_bytes * spec.queue_scaling / spec.segment_size as f64) as u64;
    (segments > 0).then_some(segments)
}

/// Build the dumbbell and apply the per-leaf transport policies.
///
/// Policies are assigned to left leaves in order, one per leaf,
/// `min(policies.len(), leaf_count)` assignments in total; leaves
/// beyond that keep the engine default. Each assignment is consumed
/// exactly once here and recorded immutably in the returned
/// [`DumbbellSetup`].
pub fn configure<E: Engine>(
    engine: &mut E,
    spec: &DumbbellSpec,
    policies: &[CcAlgorithm],
) -> Result<DumbbellSetup, ConfigError> {
    if spec.leaf_count == 0 {
        return Err(ConfigError::NoLeaves);
    }
    if spec.segment_size == 0 {
        return Err(ConfigError::ZeroSegmentSize);
    }

    engine.set_segment_size(spec.segment_size);
    let refs = engine.build_dumbbell(spec)?;
    if refs.left_senders.len() != spec.leaf_count as usize {
        return Err(EngineError::InvalidTopology {
            reason: format!(
                "expected {} sender connections, engine returned {}",
                spec.leaf_count,
                refs.left_senders.len()
            ),
        }
        .into());
    }

    let queue_capacity = queue_capacity_segments(spec);
    if let Some(segments) = queue_capacity {
        for queue in &refs.bottleneck_queues {
            engine.set_queue_capacity(*queue, segments);
        }
        tracing::debug!(segments, "bottleneck queue capacity applied");
    }

    let mut assignments = vec![None; spec.leaf_count as usize];
    let assigned = policies.len().min(spec.leaf_count as usize);
    for (leaf, algorithm) in policies.iter().take(assigned).copied().enumerate() {
        engine.set_congestion_control(refs.left_senders[leaf], algorithm)?;
        assignments[leaf] = Some(algorithm);
        tracing::debug!(leaf, %algorithm, "congestion control assigned");
    }

    Ok(DumbbellSetup {
        refs,
        assignments,
        queue_capacity_segments: queue_capacity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConnRef, QueueRef};
    use crate::flow::FlowStatsSnapshot;
    use crate::time::SimTime;
    use crate::trace::TraceRegistry;
    use std::collections::HashMap;

    /// records configuration calls, nothing else
    #[derive(Default)]
    struct RecordingEngine {
        segment_size: Option<u64>,
        queue_capacities: HashMap<u64, u64>,
        congestion_control: HashMap<u64, CcAlgorithm>,
    }

    impl Engine for RecordingEngine {
        fn set_segment_size(&mut self, bytes: u64) {
            self.segment_size = Some(bytes);
        }

        fn build_dumbbell(&mut self, spec: &DumbbellSpec) -> Result<DumbbellRefs, EngineError> {
            Ok(DumbbellRefs {
                left_senders: (0..spec.leaf_count as u64).map(ConnRef::new).collect(),
                bottleneck_queues: vec![QueueRef::new(0), QueueRef::new(1)],
            })
        }

        fn set_queue_capacity(&mut self, queue: QueueRef, segments: u64) {
            self.queue_capacities.insert(queue.into_u64(), segments);
        }

        fn set_congestion_control(
            &mut self,
            conn: ConnRef,
            algorithm: CcAlgorithm,
        ) -> Result<(), EngineError> {
            self.congestion_control.insert(conn.into_u64(), algorithm);
            Ok(())
        }

        fn start_traffic(&mut self, _conn: ConnRef) {}
        fn stop_traffic(&mut self, _conn: ConnRef) {}
        fn advance(&mut self, _now: SimTime, _traces: &mut TraceRegistry) {}

        fn flow_stats(&self) -> FlowStatsSnapshot {
            FlowStatsSnapshot::new()
        }
    }

    #[test]
    fn capacity_is_positive_for_default_parameters() {
        // 1.25 MB/s * 0.18 s * 1.5 / 1448 B = 233 segments
        let spec = DumbbellSpec::default();
        assert_eq!(queue_capacity_segments(&spec), Some(233));
    }

    #[test]
    fn zero_capacity_is_skipped() {
        let spec = DumbbellSpec {
            queue_scaling: 0.0,
            ..DumbbellSpec::default()
        };
        assert_eq!(queue_capacity_segments(&spec), None);

        let mut engine = RecordingEngine::default();
        let setup = configure(&mut engine, &spec, &defaults::POLICIES).unwrap();
        assert_eq!(setup.queue_capacity_segments, None);
        assert!(engine.queue_capacities.is_empty());
    }

    #[test]
    fn two_leaves_two_policies() {
        let spec = DumbbellSpec::default();
        let mut engine = RecordingEngine::default();
        let setup =
            configure(&mut engine, &spec, &[CcAlgorithm::Bbr, CcAlgorithm::Cubic]).unwrap();

        assert_eq!(
            setup.assignments,
            vec![Some(CcAlgorithm::Bbr), Some(CcAlgorithm::Cubic)]
        );
        assert_eq!(engine.congestion_control[&0], CcAlgorithm::Bbr);
        assert_eq!(engine.congestion_control[&1], CcAlgorithm::Cubic);
        assert_eq!(engine.segment_size, Some(spec.segment_size));
        // both bottleneck-facing queues capped identically
        assert_eq!(engine.queue_capacities[&0], engine.queue_capacities[&1]);
        assert!(setup.queue_capacity_segments.unwrap() > 0);
    }

    #[test]
    fn more_leaves_than_policies_keeps_engine_default() {
        let spec = DumbbellSpec {
            leaf_count: 4,
            ..DumbbellSpec::default()
        };
        let mut engine = RecordingEngine::default();
        let setup =
            configure(&mut engine, &spec, &[CcAlgorithm::Bbr, CcAlgorithm::Cubic]).unwrap();

        assert_eq!(engine.congestion_control.len(), 2);
        assert_eq!(setup.assignments[2], None);
        assert_eq!(setup.assignments[3], None);
    }

    #[test]
    fn more_policies_than_leaves() {
        let spec = DumbbellSpec {
            leaf_count: 1,
            ..DumbbellSpec::default()
        };
        let mut engine = RecordingEngine::default();
        let setup = configure(
            &mut engine,
            &spec,
            &[CcAlgorithm::Bbr, CcAlgorithm::Cubic, CcAlgorithm::Bic],
        )
        .unwrap();

        assert_eq!(setup.assignments, vec![Some(CcAlgorithm::Bbr)]);
        assert_eq!(engine.congestion_control.len(), 1);
    }

    #[test]
    fn zero_leaves_is_fatal() {
        let spec = DumbbellSpec {
            leaf_count: 0,
            ..DumbbellSpec::default()
        };
        let mut engine = RecordingEngine::default();
        assert!(matches!(
            configure(&mut engine, &spec, &defaults::POLICIES),
            Err(ConfigError::NoLeaves)
        ));
    }

    #[test]
    fn parse_algorithm() {
        assert_eq!("bbr".parse::<CcAlgorithm>().unwrap(), CcAlgorithm::Bbr);
        assert_eq!("Cubic".parse::<CcAlgorithm>().unwrap(), CcAlgorithm::Cubic);
        assert!("reno".parse::<CcAlgorithm>().is_err());
    }
}
