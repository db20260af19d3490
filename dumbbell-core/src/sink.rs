//! Output sinks: the per-run directory, the pre-opened record streams
//! and the plain-text run log.
//!
//! Every stream that will ever be written is opened by the
//! [`SinkManager`] before traffic or sampling starts; no component
//! creates a stream at run time. Each [`Series`] is written by exactly
//! one consumer — the manager only allocates and, at run end, flushes.

use crate::time::SimTime;
use anyhow::{Context as _, Result};
use std::{
    cell::RefCell,
    fmt,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

type SharedWriter = Rc<RefCell<dyn Write>>;

/// One directory per run, named from the wall-clock time the run
/// started so successive runs never overwrite each other.
#[derive(Debug, Clone)]
pub struct RunDir {
    path: PathBuf,
}

impl RunDir {
    /// Create a fresh timestamp-named directory under `root`.
    ///
    /// Failing to create the directory is fatal for the whole run.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|epoch| epoch.as_secs())
            .unwrap_or(0);

        // two runs within the same second get distinct suffixes
        for attempt in 0..u32::MAX {
            let name = if attempt == 0 {
                format!("run-{stamp}")
            } else {
                format!("run-{stamp}.{attempt}")
            };
            let path = root.join(name);
            if path.exists() {
                continue;
            }
            fs::create_dir_all(&path)
                .with_context(|| format!("cannot create output directory {}", path.display()))?;
            return Ok(Self { path });
        }
        unreachable!("ran out of run directory names under {}", root.display())
    }

    /// Use `path` itself as the run directory, creating it if needed.
    pub fn at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)
            .with_context(|| format!("cannot create output directory {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An append-only series of `time value` rows, one per record.
///
/// Owned exclusively by the component that produces the series:
/// either an instrumentation observer or a periodic sampler. Virtual
/// time is non-decreasing within a series by construction (the event
/// loop never goes backwards); this is debug-asserted here.
pub struct Series {
    writer: SharedWriter,
    last: Option<SimTime>,
}

impl Series {
    pub(crate) fn new(writer: SharedWriter) -> Self {
        Self { writer, last: None }
    }

    /// Append one `(time, value)` record.
    pub fn record(&mut self, now: SimTime, value: f64) -> io::Result<()> {
        self.write_row(now, format_args!("{value}"))
    }

    /// Append a record whose value could not be measured — a counter
    /// anomaly. Written as `nan` so the row stays distinguishable from
    /// every real sample without breaking column-oriented consumers.
    pub fn record_anomaly(&mut self, now: SimTime) -> io::Result<()> {
        self.write_row(now, format_args!("nan"))
    }

    fn write_row(&mut self, now: SimTime, value: fmt::Arguments<'_>) -> io::Result<()> {
        debug_assert!(
            self.last.is_none_or(|last| last <= now),
            "series time went backwards: {:?} after {:?}",
            now,
            self.last
        );
        self.last = Some(now);
        writeln!(self.writer.borrow_mut(), "{} {value}", now.as_secs_f64())
    }
}

/// The run's plain-text log (`log.txt`): run parameters up front,
/// per-flow aggregates at the end.
pub struct RunLog {
    writer: SharedWriter,
}

impl RunLog {
    pub fn line(&mut self, line: impl fmt::Display) -> io::Result<()> {
        writeln!(self.writer.borrow_mut(), "{line}")
    }
}

/// Allocates every output stream of a run up front.
///
/// File names are composed deterministically from entity identity and
/// metric name, so the output layout is stable for a fixed experiment
/// configuration. The manager never writes a data row itself; it keeps
/// a flush handle per stream and [`finish`](SinkManager::finish)
/// flushes them all at run end.
pub struct SinkManager {
    dir: PathBuf,
    streams: Vec<(String, SharedWriter)>,
}

impl SinkManager {
    pub fn new(run_dir: &RunDir) -> Self {
        Self {
            dir: run_dir.path().to_owned(),
            streams: Vec::new(),
        }
    }

    /// Open the record stream `name` inside the run directory.
    ///
    /// A failure here aborts the run: if the destination is not
    /// writable there is no point starting the experiment.
    pub fn open_series(&mut self, name: &str) -> Result<Series> {
        Ok(Series::new(self.open(name)?))
    }

    /// Open the run log (`log.txt`).
    pub fn open_log(&mut self) -> Result<RunLog> {
        Ok(RunLog {
            writer: self.open("log.txt")?,
        })
    }

    fn open(&mut self, name: &str) -> Result<SharedWriter> {
        let path = self.dir.join(name);
        let file = File::create(&path)
            .with_context(|| format!("cannot open output stream {}", path.display()))?;
        let writer: SharedWriter = Rc::new(RefCell::new(BufWriter::new(file)));
        self.streams.push((name.to_owned(), Rc::clone(&writer)));
        Ok(writer)
    }

    /// names of every stream opened so far, in opening order
    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().map(|(name, _)| name.as_str())
    }

    /// Flush every stream. Called once when the run completes.
    pub fn finish(&mut self) -> Result<()> {
        for (name, writer) in &self.streams {
            writer
                .borrow_mut()
                .flush()
                .with_context(|| format!("cannot flush output stream {name}"))?;
        }
        Ok(())
    }
}

/// in-memory series for unit tests; the buffer side lets the test read
/// back what was recorded
#[cfg(test)]
pub(crate) fn memory_series() -> (Series, Rc<RefCell<Vec<u8>>>) {
    let buffer = Rc::new(RefCell::new(Vec::new()));
    let writer: SharedWriter = buffer.clone();
    (Series::new(writer), buffer)
}
