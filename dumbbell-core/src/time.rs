use core::fmt;
use std::{ops::Add, time::Duration};

/// A point on the virtual timeline, measured from the start of the run.
///
/// The simulation is virtual-time driven: nothing here relates to wall
/// clocks. `SimTime` is totally ordered and only ever moves forward —
/// the [`Scheduler`] guarantees that events fire in non-decreasing
/// `SimTime` order.
///
/// # Example
///
/// ```
/// # use dumbbell_core::SimTime;
/// # use std::time::Duration;
/// let start = SimTime::ZERO;
/// let later = start + Duration::from_millis(100);
/// assert!(start < later);
/// assert_eq!(later.as_secs_f64(), 0.1);
/// ```
///
/// [`Scheduler`]: crate::Scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(Duration);

impl SimTime {
    /// the start of the run
    pub const ZERO: Self = SimTime(Duration::ZERO);

    /// create a [`SimTime`] from the elapsed virtual time since the run start
    pub const fn new(since_start: Duration) -> Self {
        Self(since_start)
    }

    /// create a [`SimTime`] a whole number of seconds into the run
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// elapsed virtual time since the run start, in seconds
    ///
    /// This is the value written in the first column of every output
    /// record.
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }

    #[inline]
    pub fn into_duration(self) -> Duration {
        self.0
    }

    /// the virtual time elapsed since `earlier`, or `None` if `earlier`
    /// is actually later than `self`
    pub fn elapsed_since(self, earlier: SimTime) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> Self::Output {
        SimTime(self.0.saturating_add(rhs))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs_f64())
    }
}
