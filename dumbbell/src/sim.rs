//! A built-in fluid-model engine.
//!
//! This is deliberately coarse: senders are modelled as rate sources
//! window-limited by their congestion control, the bottleneck as one
//! drop-tail fluid queue. It is good enough to exercise the whole
//! harness end to end and produce plausible traces; it is not a packet
//! simulator.

use dumbbell_core::{
    CcAlgorithm, ConnRef, DumbbellRefs, DumbbellSpec, Engine, EngineError, EntityRef, FlowId,
    FlowStatsSnapshot, QueueRef, SimTime, TraceRegistry, TraceValue, TraceVar, defaults,
};
use rand_chacha::ChaChaRng;
use rand_core::{Rng, SeedableRng as _};
use std::time::Duration;

/// bytes of acknowledgment traffic per delivered segment
const ACK_BYTES: u64 = 54;

/// initial window, in segments
const INITIAL_WINDOW: f64 = 10.0;

/// initial slow-start threshold in bytes, effectively "unset"
const INITIAL_SSTHRESH: f64 = u32::MAX as f64;

/// Multiplicative-decrease factor applied to the window on loss.
const fn decrease_factor(algorithm: Option<CcAlgorithm>) -> f64 {
    match algorithm {
        Some(CcAlgorithm::Bbr) => 0.9,
        Some(CcAlgorithm::Cubic) => 0.7,
        Some(CcAlgorithm::Bic) => 0.8,
        // engine default behaves like classic halving
        None => 0.5,
    }
}

/// Congestion-avoidance growth gain, in segments per round trip.
const fn growth_gain(algorithm: Option<CcAlgorithm>) -> f64 {
    match algorithm {
        Some(CcAlgorithm::Bbr) => 2.0,
        Some(CcAlgorithm::Bic) => 1.2,
        Some(CcAlgorithm::Cubic) | None => 1.0,
    }
}

fn uniform<R: Rng>(rng: &mut R) -> f64 {
    let bits = rng.next_u64();
    (bits as f64) * (1.0 / (u64::MAX as f64 + 1.0))
}

/// last values handed to the trace registry, so a variable is only
/// reported when it changes
#[derive(Debug, Default)]
struct Emitted {
    cwnd: Option<u64>,
    in_flight: Option<u64>,
    rtt: Option<Duration>,
    rto: Option<Duration>,
    ssthresh: Option<u64>,
    next_tx: Option<u64>,
}

#[derive(Debug)]
struct Sender {
    conn: ConnRef,
    algorithm: Option<CcAlgorithm>,
    active: bool,
    /// congestion window, bytes
    cwnd: f64,
    /// slow-start threshold, bytes
    ssthresh: f64,
    in_flight: f64,
    srtt: Duration,
    rto: Duration,
    /// segments handed to the network so far
    next_tx: u64,
    forward: FlowId,
    reverse: FlowId,
    emitted: Emitted,
}

impl Sender {
    fn emit(&mut self, now: SimTime, segment: f64, traces: &mut TraceRegistry) {
        let entity = EntityRef::Conn(self.conn);

        let cwnd = self.cwnd as u64;
        if self.emitted.cwnd != Some(cwnd) {
            self.emitted.cwnd = Some(cwnd);
            traces.emit(entity, TraceVar::CongestionWindow, now, TraceValue::Bytes(cwnd));
        }
        let in_flight = self.in_flight as u64;
        if self.emitted.in_flight != Some(in_flight) {
            self.emitted.in_flight = Some(in_flight);
            traces.emit(entity, TraceVar::BytesInFlight, now, TraceValue::Bytes(in_flight));
        }
        if self.emitted.rtt != Some(self.srtt) {
            self.emitted.rtt = Some(self.srtt);
            traces.emit(entity, TraceVar::Rtt, now, TraceValue::Time(self.srtt));
        }
        if self.emitted.rto != Some(self.rto) {
            self.emitted.rto = Some(self.rto);
            traces.emit(entity, TraceVar::Rto, now, TraceValue::Time(self.rto));
        }
        let ssthresh = (self.ssthresh / segment) as u64;
        if self.emitted.ssthresh != Some(ssthresh) {
            self.emitted.ssthresh = Some(ssthresh);
            traces.emit(
                entity,
                TraceVar::SlowStartThreshold,
                now,
                TraceValue::Count(ssthresh),
            );
        }
        if self.emitted.next_tx != Some(self.next_tx) {
            self.emitted.next_tx = Some(self.next_tx);
            traces.emit(entity, TraceVar::NextTxSequence, now, TraceValue::Count(self.next_tx));
        }
    }
}

/// The engine: a handful of window-limited rate sources competing for
/// one drop-tail fluid queue. All randomness (receive errors) comes
/// from a single seeded [`ChaChaRng`], so a run is reproducible from
/// its seed.
pub struct FluidEngine {
    spec: DumbbellSpec,
    segment_size: u64,
    /// bottleneck queue limit, bytes
    queue_limit: Option<f64>,
    queue_bytes: f64,
    queue_ref: QueueRef,
    queue_emitted: Option<u64>,
    last_advance: SimTime,
    rng: ChaChaRng,
    senders: Vec<Sender>,
    stats: FlowStatsSnapshot,
}

impl FluidEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            spec: DumbbellSpec::default(),
            segment_size: defaults::SEGMENT_SIZE,
            queue_limit: None,
            queue_bytes: 0.0,
            queue_ref: QueueRef::new(0),
            queue_emitted: None,
            last_advance: SimTime::ZERO,
            rng: ChaChaRng::seed_from_u64(seed),
            senders: Vec::new(),
            stats: FlowStatsSnapshot::new(),
        }
    }

    fn sender_mut(&mut self, conn: ConnRef) -> Option<&mut Sender> {
        self.senders.iter_mut().find(|sender| sender.conn == conn)
    }
}

impl Engine for FluidEngine {
    fn set_segment_size(&mut self, bytes: u64) {
        self.segment_size = bytes;
    }

    fn build_dumbbell(&mut self, spec: &DumbbellSpec) -> Result<DumbbellRefs, EngineError> {
        self.spec = *spec;
        let segment = self.segment_size as f64;
        // round trip through both leaf links and the bottleneck, twice
        let base_rtt = 2 * spec.bottleneck.delay + 4 * spec.leaf.delay;

        self.senders = (0..u64::from(spec.leaf_count))
            .map(|leaf| Sender {
                conn: ConnRef::new(leaf),
                algorithm: None,
                active: false,
                cwnd: INITIAL_WINDOW * segment,
                ssthresh: INITIAL_SSTHRESH,
                in_flight: 0.0,
                srtt: base_rtt,
                rto: 2 * base_rtt,
                next_tx: 0,
                forward: FlowId::new(2 * leaf + 1),
                reverse: FlowId::new(2 * leaf + 2),
                emitted: Emitted::default(),
            })
            .collect();

        Ok(DumbbellRefs {
            left_senders: self.senders.iter().map(|sender| sender.conn).collect(),
            bottleneck_queues: vec![QueueRef::new(0), QueueRef::new(1)],
        })
    }

    fn set_queue_capacity(&mut self, _queue: QueueRef, segments: u64) {
        self.queue_limit = Some(segments as f64 * self.segment_size as f64);
    }

    fn set_congestion_control(
        &mut self,
        conn: ConnRef,
        algorithm: CcAlgorithm,
    ) -> Result<(), EngineError> {
        let sender = self
            .sender_mut(conn)
            .ok_or(EngineError::UnknownConnection { conn })?;
        sender.algorithm = Some(algorithm);
        Ok(())
    }

    fn start_traffic(&mut self, conn: ConnRef) {
        if let Some(sender) = self.sender_mut(conn) {
            sender.active = true;
        } else {
            tracing::warn!(%conn, "start requested for unknown connection");
        }
    }

    fn stop_traffic(&mut self, conn: ConnRef) {
        if let Some(sender) = self.sender_mut(conn) {
            sender.active = false;
            sender.in_flight = 0.0;
        } else {
            tracing::warn!(%conn, "stop requested for unknown connection");
        }
    }

    fn advance(&mut self, now: SimTime, traces: &mut TraceRegistry) {
        let Some(dt) = now.elapsed_since(self.last_advance) else {
            return;
        };
        self.last_advance = now;
        if dt.is_zero() || self.senders.is_empty() {
            return;
        }
        let dt = dt.as_secs_f64();

        let segment = self.segment_size as f64;
        let bottleneck_rate = self.spec.bottleneck.bandwidth.bytes_per_sec() as f64;
        let leaf_rate = self.spec.leaf.bandwidth.bytes_per_sec() as f64;
        let base_rtt = (2 * self.spec.bottleneck.delay + 4 * self.spec.leaf.delay).as_secs_f64();
        let error_rate = self.spec.error_rate;

        // bytes each sender offers to the bottleneck this step
        let offered: Vec<f64> = self
            .senders
            .iter()
            .map(|sender| {
                if sender.active {
                    (sender.cwnd / sender.srtt.as_secs_f64()).min(leaf_rate)
                } else {
                    0.0
                }
            })
            .collect();
        let arrival: f64 = offered.iter().sum::<f64>() * dt;

        // drop-tail fluid queue
        let departures = (self.queue_bytes + arrival).min(bottleneck_rate * dt);
        let mut queue = self.queue_bytes + arrival - departures;
        let overflow = match self.queue_limit {
            Some(limit) if queue > limit => {
                let excess = queue - limit;
                queue = limit;
                excess
            }
            _ => 0.0,
        };
        self.queue_bytes = queue;
        let queue_delay = queue / bottleneck_rate;

        let Self {
            senders,
            rng,
            stats,
            ..
        } = self;
        for (index, sender) in senders.iter_mut().enumerate() {
            let share = if arrival > 0.0 {
                offered[index] * dt / arrival
            } else {
                0.0
            };
            let sent = offered[index] * dt;
            let delivered = departures * share;
            let delivered_segments = (delivered / segment) as u64;

            // overflow drops plus random receive errors, whole segments
            let mut losses = (overflow * share / segment).round() as u64;
            if error_rate > 0.0 {
                for _ in 0..delivered_segments {
                    if uniform(rng) < error_rate {
                        losses += 1;
                    }
                }
            }
            let received = delivered - (losses as f64 * segment).min(delivered);

            // RTT tracks the queueing delay behind the bottleneck
            let rtt = base_rtt + queue_delay;
            let srtt = sender.srtt.as_secs_f64() * 0.875 + rtt * 0.125;
            sender.srtt = Duration::from_secs_f64(srtt);
            sender.rto = Duration::from_secs_f64((2.0 * srtt).max(0.2));

            if sender.active {
                if losses > 0 {
                    sender.ssthresh =
                        (sender.cwnd * decrease_factor(sender.algorithm)).max(2.0 * segment);
                    sender.cwnd = sender.ssthresh;
                } else if received > 0.0 {
                    if sender.cwnd < sender.ssthresh {
                        sender.cwnd += received;
                    } else {
                        sender.cwnd += growth_gain(sender.algorithm) * segment * received / sender.cwnd;
                    }
                    sender.cwnd = sender.cwnd.min(leaf_rate * srtt);
                }
            }
            sender.in_flight = (offered[index] * srtt).min(sender.cwnd);
            if sent > 0.0 {
                sender.next_tx += (sent / segment).round() as u64;
            }

            // cumulative counters: data forward, acknowledgments back
            if sent > 0.0 || received > 0.0 || losses > 0 {
                let forward = stats.entry(sender.forward).or_default();
                forward.tx_bytes += sent.round() as u64;
                forward.lost_packets += losses;
                if forward.first_tx.is_none() {
                    forward.first_tx = Some(now);
                }
                if received > 0.0 {
                    forward.rx_bytes += received.round() as u64;
                    forward.last_rx = Some(now);
                }
                if delivered_segments > 0 {
                    let acks = delivered_segments * ACK_BYTES;
                    let reverse = stats.entry(sender.reverse).or_default();
                    reverse.tx_bytes += acks;
                    reverse.rx_bytes += acks;
                    if reverse.first_tx.is_none() {
                        reverse.first_tx = Some(now);
                    }
                    reverse.last_rx = Some(now);
                }
            }

            sender.emit(now, segment, traces);
        }

        let occupancy = self.queue_bytes as u64;
        if self.queue_emitted != Some(occupancy) {
            self.queue_emitted = Some(occupancy);
            traces.emit(
                EntityRef::Queue(self.queue_ref),
                TraceVar::BytesInQueue,
                now,
                TraceValue::Bytes(occupancy),
            );
        }
    }

    fn flow_stats(&self) -> FlowStatsSnapshot {
        self.stats.clone()
    }
}
