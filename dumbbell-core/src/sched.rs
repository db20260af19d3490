use crate::time::SimTime;
use core::cmp::Reverse;
use std::{collections::BinaryHeap, time::Duration};

type Event<W> = Box<dyn FnOnce(&mut Scheduler<W>, &mut W)>;

/// Single-threaded, cooperative discrete-event scheduler.
///
/// All work in a run — topology setup, instrumentation callbacks, the
/// periodic samplers, traffic start/stop — executes as callbacks on
/// this one logical timeline. There is no preemption: a callback runs
/// to completion before the next one fires.
///
/// Events fire in non-decreasing [`SimTime`] order; events scheduled
/// for the same virtual time fire in the order they were scheduled
/// (FIFO tie-break, enforced by a per-scheduler sequence counter).
///
/// A callback receives the scheduler itself and may schedule further
/// events, including rescheduling itself by moving its state into the
/// next closure.
///
/// # Example
///
/// ```
/// # use dumbbell_core::{Scheduler, SimTime};
/// # use std::time::Duration;
/// let mut sched: Scheduler<Vec<u64>> = Scheduler::new();
/// sched.schedule_in(Duration::from_secs(1), |sched, seen| {
///     seen.push(sched.now().into_duration().as_secs());
/// });
///
/// let mut seen = Vec::new();
/// sched.run_until(&mut seen, SimTime::from_secs(10));
/// assert_eq!(seen, vec![1]);
/// assert_eq!(sched.now(), SimTime::from_secs(10));
/// ```
pub struct Scheduler<W> {
    now: SimTime,

    /// tie-break for events due at the same virtual time: lower
    /// sequence numbers were scheduled first and fire first
    seq: u64,

    queue: BinaryHeap<Reverse<OrderedByTime<W>>>,
}

struct OrderedByTime<W> {
    due: SimTime,
    seq: u64,
    event: Event<W>,
}

impl<W> PartialEq for OrderedByTime<W> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<W> Eq for OrderedByTime<W> {}

impl<W> PartialOrd for OrderedByTime<W> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> Ord for OrderedByTime<W> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

impl<W> Scheduler<W> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            seq: 0,
            queue: BinaryHeap::new(),
        }
    }

    /// the current virtual time
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// schedule `event` to fire at virtual time `due`.
    ///
    /// Time never goes backwards: a `due` in the past is clamped to
    /// the current virtual time.
    pub fn schedule_at(
        &mut self,
        due: SimTime,
        event: impl FnOnce(&mut Scheduler<W>, &mut W) + 'static,
    ) {
        let due = due.max(self.now);
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(OrderedByTime {
            due,
            seq,
            event: Box::new(event),
        }));
    }

    /// schedule `event` to fire `delay` after the current virtual time
    pub fn schedule_in(
        &mut self,
        delay: Duration,
        event: impl FnOnce(&mut Scheduler<W>, &mut W) + 'static,
    ) {
        self.schedule_at(self.now + delay, event)
    }

    fn next_due(&self) -> Option<SimTime> {
        self.queue.peek().map(|Reverse(entry)| entry.due)
    }

    /// Run the event loop until `horizon`.
    ///
    /// Every event due at or before `horizon` fires; later events stay
    /// queued (there is no cancellation — self-rescheduling tasks stop
    /// implicitly when the loop stops). On return the virtual clock
    /// reads `horizon`, so a subsequent call continues the same
    /// timeline.
    pub fn run_until(&mut self, world: &mut W, horizon: SimTime) {
        while let Some(due) = self.next_due() {
            if due > horizon {
                break;
            }
            let Reverse(entry) = self
                .queue
                .pop()
                .expect("We just peeked the queue, so a pop should always work");
            self.now = entry.due;
            (entry.event)(self, world);
        }
        self.now = horizon;
    }
}

impl<W> Default for Scheduler<W> {
    fn default() -> Self {
        Self::new()
    }
}
