//! Event-driven instrumentation: a subscription registry wiring the
//! engine's state-change notifications to per-entity output series.
//!
//! The engine invokes [`TraceRegistry::emit`] synchronously at the
//! moment a monitored variable changes; every observer registered for
//! that `(entity, variable)` pair runs immediately, in registration
//! order, on the one cooperative timeline. Observers must not block or
//! do unbounded work.

use crate::{
    engine::{ConnRef, QueueRef},
    sink::Series,
    time::SimTime,
};
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

/// A monitored internal state variable of a connection or queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceVar {
    CongestionWindow,
    BytesInFlight,
    Rtt,
    Rto,
    SlowStartThreshold,
    NextTxSequence,
    BytesInQueue,
}

impl TraceVar {
    /// the six per-connection variables, in the order their series are
    /// opened
    pub const CONNECTION: [TraceVar; 6] = [
        TraceVar::CongestionWindow,
        TraceVar::BytesInFlight,
        TraceVar::Rtt,
        TraceVar::Rto,
        TraceVar::SlowStartThreshold,
        TraceVar::NextTxSequence,
    ];

    /// the metric name used in output file names
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::CongestionWindow => "cwnd",
            Self::BytesInFlight => "inflight",
            Self::Rtt => "rtt",
            Self::Rto => "rto",
            Self::SlowStartThreshold => "ssthresh",
            Self::NextTxSequence => "nexttx",
            Self::BytesInQueue => "queueSize",
        }
    }

    /// Convert a raw engine value into the unit this variable is
    /// recorded in:
    ///
    /// - window-like byte quantities (congestion window, bytes in
    ///   flight, bytes in queue) are divided by the segment size and
    ///   recorded in segments;
    /// - time quantities (RTT, RTO) are recorded in seconds;
    /// - the remaining counts are recorded raw.
    pub fn normalize(self, value: TraceValue, segment_size: u64) -> Result<f64, NormalizeError> {
        match (self, value) {
            (
                Self::CongestionWindow | Self::BytesInFlight | Self::BytesInQueue,
                TraceValue::Bytes(bytes),
            ) => Ok(bytes as f64 / segment_size as f64),
            (Self::Rtt | Self::Rto, TraceValue::Time(duration)) => Ok(duration.as_secs_f64()),
            (Self::SlowStartThreshold | Self::NextTxSequence, TraceValue::Count(count)) => {
                Ok(count as f64)
            }
            (var, value) => Err(NormalizeError { var, value }),
        }
    }
}

/// The raw value carried by a state-change notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceValue {
    Bytes(u64),
    Time(Duration),
    Count(u64),
}

/// A notification carried a value of the wrong kind for its variable.
#[derive(Debug, Clone, Copy, Error)]
#[error("variable {var:?} cannot record value {value:?}")]
pub struct NormalizeError {
    pub var: TraceVar,
    pub value: TraceValue,
}

/// A monitored entity: one sender connection or one bottleneck queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Conn(ConnRef),
    Queue(QueueRef),
}

type Observer = Box<dyn FnMut(SimTime, TraceValue)>;

/// Maps `(entity, variable)` to the observers notified when that
/// variable changes.
#[derive(Default)]
pub struct TraceRegistry {
    observers: HashMap<(EntityRef, TraceVar), Vec<Observer>>,
}

impl TraceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` for `(entity, var)`. Observers fire in
    /// registration order.
    pub fn subscribe(
        &mut self,
        entity: EntityRef,
        var: TraceVar,
        observer: impl FnMut(SimTime, TraceValue) + 'static,
    ) {
        self.observers
            .entry((entity, var))
            .or_default()
            .push(Box::new(observer));
    }

    /// Notify every observer of `(entity, var)` that the variable now
    /// holds `value`. Invoked by the engine, synchronously, at the
    /// moment of the change.
    pub fn emit(&mut self, entity: EntityRef, var: TraceVar, now: SimTime, value: TraceValue) {
        if let Some(observers) = self.observers.get_mut(&(entity, var)) {
            for observer in observers.iter_mut() {
                observer(now, value);
            }
        }
    }

    /// Subscribe an observer that records every notification of
    /// `(entity, var)` as one normalized `(time, value)` row in
    /// `series` — no buffering, one record per notification.
    ///
    /// Must be called after the entity exists and before traffic
    /// starts; notifications emitted before the subscription are lost
    /// (acceptable: recording before flow start carries no signal).
    pub fn bind_series(
        &mut self,
        entity: EntityRef,
        var: TraceVar,
        segment_size: u64,
        mut series: Series,
    ) {
        self.subscribe(entity, var, move |now, value| {
            match var.normalize(value, segment_size) {
                Ok(normalized) => {
                    if let Err(error) = series.record(now, normalized) {
                        tracing::warn!(%error, ?var, "failed to append trace record");
                    }
                }
                Err(error) => tracing::warn!(%error, "dropping mistyped trace notification"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::memory_series;
    use std::{cell::RefCell, rc::Rc, time::Duration};

    const SEGMENT: u64 = 1_448;
    const CONN: EntityRef = EntityRef::Conn(ConnRef::new(0));

    #[test]
    fn normalization_rules() {
        // window-like bytes → segments
        assert_eq!(
            TraceVar::CongestionWindow
                .normalize(TraceValue::Bytes(2 * SEGMENT), SEGMENT)
                .unwrap(),
            2.0
        );
        assert_eq!(
            TraceVar::BytesInQueue
                .normalize(TraceValue::Bytes(SEGMENT / 2), SEGMENT)
                .unwrap(),
            0.5
        );
        // times → seconds
        assert_eq!(
            TraceVar::Rtt
                .normalize(TraceValue::Time(Duration::from_millis(250)), SEGMENT)
                .unwrap(),
            0.25
        );
        // counts → raw
        assert_eq!(
            TraceVar::SlowStartThreshold
                .normalize(TraceValue::Count(42), SEGMENT)
                .unwrap(),
            42.0
        );
        assert_eq!(
            TraceVar::NextTxSequence
                .normalize(TraceValue::Count(7), SEGMENT)
                .unwrap(),
            7.0
        );
    }

    #[test]
    fn mistyped_value_is_an_error() {
        assert!(
            TraceVar::Rtt
                .normalize(TraceValue::Bytes(10), SEGMENT)
                .is_err()
        );
        assert!(
            TraceVar::CongestionWindow
                .normalize(TraceValue::Count(10), SEGMENT)
                .is_err()
        );
    }

    #[test]
    fn observers_fire_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut registry = TraceRegistry::new();
        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            registry.subscribe(CONN, TraceVar::Rtt, move |_, _| {
                order.borrow_mut().push(tag);
            });
        }

        registry.emit(
            CONN,
            TraceVar::Rtt,
            SimTime::ZERO,
            TraceValue::Time(Duration::from_millis(1)),
        );
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn emit_is_scoped_to_entity_and_variable() {
        let hits = Rc::new(RefCell::new(0u32));
        let mut registry = TraceRegistry::new();
        {
            let hits = Rc::clone(&hits);
            registry.subscribe(CONN, TraceVar::Rtt, move |_, _| *hits.borrow_mut() += 1);
        }

        let other = EntityRef::Conn(ConnRef::new(1));
        registry.emit(
            other,
            TraceVar::Rtt,
            SimTime::ZERO,
            TraceValue::Time(Duration::ZERO),
        );
        registry.emit(
            CONN,
            TraceVar::Rto,
            SimTime::ZERO,
            TraceValue::Time(Duration::ZERO),
        );
        assert_eq!(*hits.borrow(), 0);

        registry.emit(
            CONN,
            TraceVar::Rtt,
            SimTime::ZERO,
            TraceValue::Time(Duration::ZERO),
        );
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn bound_series_records_each_notification() {
        let (series, buffer) = memory_series();
        let mut registry = TraceRegistry::new();
        registry.bind_series(CONN, TraceVar::CongestionWindow, SEGMENT, series);

        registry.emit(
            CONN,
            TraceVar::CongestionWindow,
            SimTime::from_secs(1),
            TraceValue::Bytes(10 * SEGMENT),
        );
        registry.emit(
            CONN,
            TraceVar::CongestionWindow,
            SimTime::from_secs(2),
            TraceValue::Bytes(5 * SEGMENT),
        );

        let written = String::from_utf8(buffer.borrow().clone()).unwrap();
        assert_eq!(written, "1 10\n2 5\n");
    }
}
