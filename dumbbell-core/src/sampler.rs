//! Periodic sampling of cumulative per-flow counters into rate and
//! loss series.
//!
//! Two structurally identical sampler instances run per experiment:
//! the throughput sampler tracks cumulative transmitted bytes and
//! scales the per-interval delta to Mbps, the loss sampler tracks
//! cumulative lost packets and records the raw delta. Each sampler
//! owns its delta-tracking state and moves it into the closure of its
//! next firing — the scheduler is the sole owner of that state's
//! lifetime.

use crate::{
    engine::Engine,
    flow::{FlowId, FlowStats, FlowStatsSnapshot},
    run::World,
    sched::Scheduler,
    sink::Series,
    time::SimTime,
};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    time::Duration,
};

/// Last-observed cumulative counter value per flow.
///
/// The key set only ever grows. A flow observed for the first time
/// starts from a previous value of zero, so its first delta equals its
/// raw cumulative value at that tick — never a spurious jump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaTracker {
    previous: BTreeMap<FlowId, u64>,
}

/// The outcome of one counter observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    /// the counter advanced (possibly by zero) since the last tick
    Step(u64),
    /// The counter moved backwards — cumulative counters never should.
    /// The tracker has resynchronized to `current`; the caller records
    /// the sample as an anomaly rather than inventing a value.
    Reversed { previous: u64, current: u64 },
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of flows observed so far
    pub fn known_flows(&self) -> usize {
        self.previous.len()
    }

    /// Record the current cumulative value for `id` and return the
    /// forward difference since the previous observation.
    ///
    /// # Example
    ///
    /// ```
    /// # use dumbbell_core::{Delta, DeltaTracker, FlowId};
    /// let mut tracker = DeltaTracker::new();
    /// let flow = FlowId::new(1);
    /// // first observation: delta equals the raw cumulative value
    /// assert_eq!(tracker.advance(flow, 1_000), Delta::Step(1_000));
    /// // unchanged counter: zero delta
    /// assert_eq!(tracker.advance(flow, 1_000), Delta::Step(0));
    /// assert_eq!(tracker.advance(flow, 2_500), Delta::Step(1_500));
    /// ```
    pub fn advance(&mut self, id: FlowId, current: u64) -> Delta {
        let previous = self.previous.entry(id).or_insert(0);
        let delta = match current.checked_sub(*previous) {
            Some(step) => Delta::Step(step),
            None => Delta::Reversed {
                previous: *previous,
                current,
            },
        };
        *previous = current;
        delta
    }
}

/// Which cumulative counter a sampler tracks and how the delta is
/// scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMetric {
    /// cumulative transmitted bytes, scaled to Mbps per interval
    Throughput,
    /// cumulative lost packets, raw per-interval count
    PacketLoss,
}

impl SampleMetric {
    /// the metric name used in output file names
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::Throughput => "throughput",
            Self::PacketLoss => "packetLoss",
        }
    }

    fn counter(self, stats: &FlowStats) -> u64 {
        match self {
            Self::Throughput => stats.tx_bytes,
            Self::PacketLoss => stats.lost_packets,
        }
    }

    fn convert(self, delta: u64, interval: Duration) -> f64 {
        match self {
            Self::Throughput => delta as f64 * 8.0 / (interval.as_secs_f64() * 1e6),
            Self::PacketLoss => delta as f64,
        }
    }
}

/// A self-rescheduling periodic sampler for one metric.
///
/// Series are pre-opened before the run (streams are never created at
/// run time) and bound to flow ids in order of first appearance. A
/// flow appearing after the pool is exhausted goes unrecorded, with a
/// warning — its counters are still tracked so the pool size is the
/// only limit.
pub struct CounterSampler {
    metric: SampleMetric,
    interval: Duration,
    tracker: DeltaTracker,
    assigned: BTreeMap<FlowId, Series>,
    spare: VecDeque<Series>,
    unrecorded: BTreeSet<FlowId>,
}

impl CounterSampler {
    pub fn new(metric: SampleMetric, interval: Duration, series_pool: Vec<Series>) -> Self {
        Self {
            metric,
            interval,
            tracker: DeltaTracker::new(),
            assigned: BTreeMap::new(),
            spare: series_pool.into(),
            unrecorded: BTreeSet::new(),
        }
    }

    /// Process one statistics snapshot: every reported flow is
    /// advanced exactly once and its delta emitted into its series.
    pub fn tick(&mut self, now: SimTime, stats: &FlowStatsSnapshot) {
        let metric = self.metric;
        let interval = self.interval;
        for (id, flow) in stats {
            let delta = self.tracker.advance(*id, metric.counter(flow));
            let Some(series) = self.series_for(*id) else {
                continue;
            };
            let written = match delta {
                Delta::Step(step) => series.record(now, metric.convert(step, interval)),
                Delta::Reversed { previous, current } => {
                    tracing::warn!(
                        flow = %id,
                        metric = metric.file_stem(),
                        previous,
                        current,
                        "cumulative counter moved backwards"
                    );
                    series.record_anomaly(now)
                }
            };
            if let Err(error) = written {
                tracing::warn!(flow = %id, metric = metric.file_stem(), %error, "failed to append sample");
            }
        }
    }

    fn series_for(&mut self, id: FlowId) -> Option<&mut Series> {
        if !self.assigned.contains_key(&id) {
            match self.spare.pop_front() {
                Some(series) => {
                    self.assigned.insert(id, series);
                }
                None => {
                    if self.unrecorded.insert(id) {
                        tracing::warn!(
                            flow = %id,
                            metric = self.metric.file_stem(),
                            "no pre-opened stream left for flow, samples dropped"
                        );
                    }
                    return None;
                }
            }
        }
        self.assigned.get_mut(&id)
    }

    /// Schedule the sampler's first firing at `at`; every firing
    /// queries the engine's flow statistics, ticks, and moves the
    /// sampler into a new event one interval later.
    pub fn install<E: Engine + 'static>(mut self, sched: &mut Scheduler<World<E>>, at: SimTime) {
        sched.schedule_at(at, move |sched, world| {
            let stats = world.engine.flow_stats();
            self.tick(sched.now(), &stats);
            let next = sched.now() + self.interval;
            self.install(sched, next);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::memory_series;
    use std::{cell::RefCell, rc::Rc};

    const INTERVAL: Duration = Duration::from_millis(100);

    fn rows(buffer: &Rc<RefCell<Vec<u8>>>) -> Vec<(f64, String)> {
        String::from_utf8(buffer.borrow().clone())
            .unwrap()
            .lines()
            .map(|line| {
                let (time, value) = line.split_once(' ').unwrap();
                (time.parse().unwrap(), value.to_owned())
            })
            .collect()
    }

    fn snapshot(pairs: &[(u64, u64)], metric: SampleMetric) -> FlowStatsSnapshot {
        pairs
            .iter()
            .map(|(id, counter)| {
                let stats = match metric {
                    SampleMetric::Throughput => FlowStats {
                        tx_bytes: *counter,
                        ..FlowStats::default()
                    },
                    SampleMetric::PacketLoss => FlowStats {
                        lost_packets: *counter,
                        ..FlowStats::default()
                    },
                };
                (FlowId::new(*id), stats)
            })
            .collect()
    }

    #[test]
    fn tracker_first_delta_is_raw_cumulative() {
        let mut tracker = DeltaTracker::new();
        assert_eq!(tracker.advance(FlowId::new(7), 5_000), Delta::Step(5_000));
        assert_eq!(tracker.known_flows(), 1);
    }

    #[test]
    fn tracker_is_idempotent_on_unchanged_snapshot() {
        let mut tracker = DeltaTracker::new();
        tracker.advance(FlowId::new(1), 1_000);
        assert_eq!(tracker.advance(FlowId::new(1), 1_000), Delta::Step(0));
    }

    #[test]
    fn tracker_resynchronizes_after_reversal() {
        let mut tracker = DeltaTracker::new();
        tracker.advance(FlowId::new(1), 1_000);
        assert_eq!(
            tracker.advance(FlowId::new(1), 400),
            Delta::Reversed {
                previous: 1_000,
                current: 400
            }
        );
        // the reversal resynchronized the stored value
        assert_eq!(tracker.advance(FlowId::new(1), 500), Delta::Step(100));
    }

    #[test]
    fn throughput_series_from_cumulative_counters() {
        // tx_bytes = [0, 1000, 1000, 2500] at four successive ticks
        let (series, buffer) = memory_series();
        let mut sampler = CounterSampler::new(SampleMetric::Throughput, INTERVAL, vec![series]);

        let mut now = SimTime::ZERO;
        for tx in [0u64, 1_000, 1_000, 2_500] {
            sampler.tick(now, &snapshot(&[(1, tx)], SampleMetric::Throughput));
            now = now + INTERVAL;
        }

        let rows = rows(&buffer);
        let values: Vec<f64> = rows.iter().map(|(_, v)| v.parse().unwrap()).collect();
        // tick 1 establishes the zero baseline; ticks 2-4 are the deltas
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], 1_000.0 * 8.0 / (0.1 * 1e6));
        assert_eq!(values[2], 0.0);
        assert_eq!(values[3], 1_500.0 * 8.0 / (0.1 * 1e6));
    }

    #[test]
    fn loss_series_is_raw_packet_deltas() {
        let (series, buffer) = memory_series();
        let mut sampler = CounterSampler::new(SampleMetric::PacketLoss, INTERVAL, vec![series]);

        let mut now = SimTime::ZERO;
        for lost in [0u64, 3, 3, 10] {
            sampler.tick(now, &snapshot(&[(1, lost)], SampleMetric::PacketLoss));
            now = now + INTERVAL;
        }

        let values: Vec<f64> = rows(&buffer)
            .iter()
            .map(|(_, v)| v.parse().unwrap())
            .collect();
        assert_eq!(values, vec![0.0, 3.0, 0.0, 7.0]);
    }

    #[test]
    fn new_flow_mid_run_gets_the_next_spare_series() {
        let (series_a, buffer_a) = memory_series();
        let (series_b, buffer_b) = memory_series();
        let mut sampler =
            CounterSampler::new(SampleMetric::Throughput, INTERVAL, vec![series_a, series_b]);

        sampler.tick(
            SimTime::ZERO,
            &snapshot(&[(1, 1_000)], SampleMetric::Throughput),
        );
        // flow 2 appears on the second tick; its first delta is its raw value
        sampler.tick(
            SimTime::ZERO + INTERVAL,
            &snapshot(&[(1, 1_000), (2, 500)], SampleMetric::Throughput),
        );

        assert_eq!(rows(&buffer_a).len(), 2);
        let flow2 = rows(&buffer_b);
        assert_eq!(flow2.len(), 1);
        let value: f64 = flow2[0].1.parse().unwrap();
        assert_eq!(value, 500.0 * 8.0 / (0.1 * 1e6));
    }

    #[test]
    fn flow_beyond_pool_is_skipped_not_a_panic() {
        let (series, buffer) = memory_series();
        let mut sampler = CounterSampler::new(SampleMetric::Throughput, INTERVAL, vec![series]);

        sampler.tick(
            SimTime::ZERO,
            &snapshot(&[(1, 100), (2, 200)], SampleMetric::Throughput),
        );
        sampler.tick(
            SimTime::ZERO + INTERVAL,
            &snapshot(&[(1, 100), (2, 200)], SampleMetric::Throughput),
        );

        // only flow 1 recorded, but flow 2's counters were still tracked
        assert_eq!(rows(&buffer).len(), 2);
        assert_eq!(sampler.tracker.known_flows(), 2);
    }

    #[test]
    fn reversed_counter_writes_an_anomaly_row() {
        let (series, buffer) = memory_series();
        let mut sampler = CounterSampler::new(SampleMetric::Throughput, INTERVAL, vec![series]);

        sampler.tick(
            SimTime::ZERO,
            &snapshot(&[(1, 1_000)], SampleMetric::Throughput),
        );
        sampler.tick(
            SimTime::ZERO + INTERVAL,
            &snapshot(&[(1, 400)], SampleMetric::Throughput),
        );

        let rows = rows(&buffer);
        assert_eq!(rows[1].1, "nan");
    }
}
