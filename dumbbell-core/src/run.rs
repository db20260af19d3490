//! The run controller: sequences configuration, instrumentation
//! binding, traffic scheduling, sampling, the event loop and the final
//! summary.

use crate::{
    defaults,
    engine::Engine,
    sampler::{CounterSampler, SampleMetric},
    sched::Scheduler,
    sink::{RunDir, RunLog, Series, SinkManager},
    time::SimTime,
    topology::{self, CcAlgorithm, DumbbellSetup, DumbbellSpec},
    trace::{EntityRef, TraceRegistry, TraceVar},
};
use anyhow::{Context as _, Result};
use serde::Serialize;
use std::{fs::File, io::BufWriter, time::Duration};

/// Everything the event loop's callbacks act on: the collaborating
/// engine plus the instrumentation registry it emits into.
pub struct World<E> {
    pub engine: E,
    pub traces: TraceRegistry,
}

/// Parameters of one experiment run.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub spec: DumbbellSpec,
    /// congestion-control algorithms for the left leaves, in order
    pub policies: Vec<CcAlgorithm>,
    /// virtual time the traffic generators start
    pub start: SimTime,
    /// virtual time the traffic generators stop; the event loop runs
    /// one tick further
    pub stop: SimTime,
    pub sample_interval: Duration,
    pub heartbeat_interval: Duration,
    /// step the engine's internal model is advanced at
    pub engine_step: Duration,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            spec: DumbbellSpec::default(),
            policies: defaults::POLICIES.to_vec(),
            start: SimTime::ZERO,
            stop: SimTime::new(defaults::RUN_DURATION),
            sample_interval: defaults::SAMPLE_INTERVAL,
            heartbeat_interval: defaults::HEARTBEAT_INTERVAL,
            engine_step: defaults::ENGINE_STEP,
        }
    }
}

/// Per-flow entry of the end-of-run statistics document.
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub flow: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub first_tx_secs: Option<f64>,
    pub last_rx_secs: Option<f64>,
    /// `None` means undefined: the flow had no completed delivery
    pub goodput_mbps: Option<f64>,
}

/// What a completed run hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub flows: Vec<FlowReport>,
    pub queue_capacity_segments: Option<u64>,
}

/// Run one experiment to completion.
///
/// Sequencing: configure the topology and policies, pre-open every
/// output stream, bind instrumentation, schedule traffic start/stop
/// and the periodic samplers, run the event loop to `stop` plus one
/// tick, then serialize the full statistics and the per-flow aggregate
/// goodput.
pub fn run_experiment<E: Engine + 'static>(
    engine: E,
    config: &ExperimentConfig,
    run_dir: &RunDir,
) -> Result<RunSummary> {
    let mut engine = engine;
    let setup = topology::configure(&mut engine, &config.spec, &config.policies)
        .context("experiment configuration failed")?;

    let mut sinks = SinkManager::new(run_dir);
    let mut log = sinks.open_log()?;
    log_parameters(&mut log, config, &setup).context("cannot write run parameters")?;

    // labels used in output file names, one per left leaf
    let labels: Vec<&'static str> = setup
        .assignments
        .iter()
        .map(|assignment| assignment.map_or("default", CcAlgorithm::label))
        .collect();

    // instrumentation: six series per monitored connection, one for
    // the bottleneck queue — bound after the entities exist, before
    // traffic starts
    let mut traces = TraceRegistry::new();
    for (leaf, conn) in setup.refs.left_senders.iter().enumerate() {
        for var in TraceVar::CONNECTION {
            let name = format!("{}-{}-{leaf}.dat", var.file_stem(), labels[leaf]);
            let series = sinks.open_series(&name)?;
            traces.bind_series(
                EntityRef::Conn(*conn),
                var,
                config.spec.segment_size,
                series,
            );
        }
    }
    if let Some(queue) = setup.refs.bottleneck_queues.first() {
        let series = sinks.open_series(&format!("{}.dat", TraceVar::BytesInQueue.file_stem()))?;
        traces.bind_series(
            EntityRef::Queue(*queue),
            TraceVar::BytesInQueue,
            config.spec.segment_size,
            series,
        );
    }

    // one throughput and one loss series per expected flow: each
    // sender produces a forward (data) and a reverse (acknowledgment)
    // flow
    let expected_flows = config.spec.leaf_count as usize * 2;
    let throughput_pool = sample_pool(&mut sinks, SampleMetric::Throughput, &labels, expected_flows)?;
    let loss_pool = sample_pool(&mut sinks, SampleMetric::PacketLoss, &labels, expected_flows)?;

    let mut sched: Scheduler<World<E>> = Scheduler::new();
    for conn in setup.refs.left_senders.iter().copied() {
        sched.schedule_at(config.start, move |_, world: &mut World<E>| {
            world.engine.start_traffic(conn)
        });
        sched.schedule_at(config.stop, move |_, world: &mut World<E>| {
            world.engine.stop_traffic(conn)
        });
    }

    schedule_engine_step(&mut sched, config.start, config.engine_step);
    CounterSampler::new(SampleMetric::Throughput, config.sample_interval, throughput_pool)
        .install(&mut sched, config.start);
    CounterSampler::new(SampleMetric::PacketLoss, config.sample_interval, loss_pool)
        .install(&mut sched, config.start);
    schedule_heartbeat(&mut sched, config.heartbeat_interval);

    tracing::info!(
        leaf_count = config.spec.leaf_count,
        stop = %config.stop,
        "running"
    );
    let mut world = World { engine, traces };
    sched.run_until(&mut world, config.stop + defaults::EVENT_TICK);

    // finalize: one full statistics query, serialized once
    let stats = world.engine.flow_stats();
    let mut flows = Vec::with_capacity(stats.len());
    for (id, flow) in &stats {
        let report = FlowReport {
            flow: id.into_u64(),
            tx_bytes: flow.tx_bytes,
            rx_bytes: flow.rx_bytes,
            lost_packets: flow.lost_packets,
            first_tx_secs: flow.first_tx.map(SimTime::as_secs_f64),
            last_rx_secs: flow.last_rx.map(SimTime::as_secs_f64),
            goodput_mbps: flow.goodput_mbps(),
        };
        match report.goodput_mbps {
            Some(mbps) => log.line(format_args!("Flow: {id} Goodput: {mbps} Mbps"))?,
            None => log.line(format_args!("Flow: {id} Goodput: undefined"))?,
        }
        flows.push(report);
    }

    let stats_path = run_dir.path().join("flow-stats.json");
    let stats_file = File::create(&stats_path)
        .with_context(|| format!("cannot create {}", stats_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(stats_file), &flows)
        .context("cannot serialize flow statistics")?;

    sinks.finish()?;
    Ok(RunSummary {
        flows,
        queue_capacity_segments: setup.queue_capacity_segments,
    })
}

fn log_parameters(
    log: &mut RunLog,
    config: &ExperimentConfig,
    setup: &DumbbellSetup,
) -> std::io::Result<()> {
    let spec = &config.spec;
    match setup.queue_capacity_segments {
        Some(segments) => log.line(format_args!("QueueCapacity: {segments} segments"))?,
        None => log.line("QueueCapacity: unbounded")?,
    }
    log.line(format_args!("ErrorRate: {}", spec.error_rate))?;
    log.line(format_args!(
        "BottleneckRate: {} BottleneckDelay: {:?} LeafRate: {} LeafDelay: {:?}",
        spec.bottleneck.bandwidth, spec.bottleneck.delay, spec.leaf.bandwidth, spec.leaf.delay
    ))?;
    log.line(format_args!(
        "LeafCount: {} Start: {} Stop: {}",
        spec.leaf_count, config.start, config.stop
    ))?;
    for (leaf, assignment) in setup.assignments.iter().enumerate() {
        match assignment {
            Some(algorithm) => log.line(format_args!("Leaf: {leaf} CcAlgorithm: {algorithm}"))?,
            None => log.line(format_args!("Leaf: {leaf} CcAlgorithm: engine default"))?,
        }
    }
    Ok(())
}

fn sample_pool(
    sinks: &mut SinkManager,
    metric: SampleMetric,
    labels: &[&'static str],
    expected_flows: usize,
) -> Result<Vec<Series>> {
    let mut pool = Vec::with_capacity(expected_flows);
    for index in 0..expected_flows {
        let label = labels[index % labels.len()];
        let name = format!("{}-{label}-{index}.dat", metric.file_stem());
        pool.push(sinks.open_series(&name)?);
    }
    Ok(pool)
}

/// Advance the collaborating engine's internal model at a fixed step,
/// letting it emit state-change notifications into the registry.
fn schedule_engine_step<E: Engine + 'static>(
    sched: &mut Scheduler<World<E>>,
    at: SimTime,
    step: Duration,
) {
    sched.schedule_at(at, move |sched, world: &mut World<E>| {
        let World { engine, traces } = world;
        engine.advance(sched.now(), traces);
        schedule_engine_step(sched, sched.now() + step, step);
    });
}

/// Progress report on the run's own timeline — pure observability, no
/// state.
fn schedule_heartbeat<E: Engine + 'static>(sched: &mut Scheduler<World<E>>, every: Duration) {
    sched.schedule_in(every, move |sched, _: &mut World<E>| {
        tracing::info!(now = %sched.now(), "experiment running");
        schedule_heartbeat(sched, every);
    });
}
