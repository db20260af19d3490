//! Experiment orchestration and metrics-sampling harness for comparing
//! congestion-control algorithms competing over a shared dumbbell
//! bottleneck.
//!
//! The network-simulation engine itself is a collaborator consumed
//! through [`Engine`]; this crate owns the discrete-event timeline
//! ([`Scheduler`]), the topology and per-leaf policy configuration
//! ([`configure`]), the event-driven instrumentation ([`TraceRegistry`]),
//! the periodic counter samplers ([`CounterSampler`]) and the
//! pre-opened output sinks ([`SinkManager`]). [`run_experiment`]
//! composes them into one batch run.

pub mod defaults;
mod engine;
mod flow;
mod measure;
mod run;
mod sampler;
mod sched;
mod sink;
mod time;
mod topology;
mod trace;

pub use self::{
    engine::{ConnRef, DumbbellRefs, Engine, EngineError, QueueRef},
    flow::{FlowId, FlowStats, FlowStatsSnapshot},
    measure::Bandwidth,
    run::{ExperimentConfig, FlowReport, RunSummary, World, run_experiment},
    sampler::{CounterSampler, Delta, DeltaTracker, SampleMetric},
    sched::Scheduler,
    sink::{RunDir, RunLog, Series, SinkManager},
    time::SimTime,
    topology::{
        CcAlgorithm, ConfigError, DumbbellSetup, DumbbellSpec, LinkSpec, configure,
        queue_capacity_segments,
    },
    trace::{EntityRef, NormalizeError, TraceRegistry, TraceValue, TraceVar},
};
