//! Poll loop multiplexing every started path on one thread
//!
//! Jobs are registered as readiness descriptors: source nodes, destination
//! queues and rate timers. The job table is rebuilt on every registration
//! change; the poll thread picks up a new generation after the wake-up
//! descriptor interrupts it.

use crate::hot_path::path::{PathCore, PathTimer};
use crate::hot_path::path_destination::PathDestination;
use crate::hot_path::path_source::PathSource;
use crate::infrastructure::fd::{self, EventFd};
use crate::nodes::{same_node, NodeError};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace};

/// Poll timeout of the worker thread; bounds shutdown latency
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("job {0} is already registered")]
    Duplicate(String),

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error("node '{0}' has no poll descriptor")]
    NoDescriptor(String),

    #[error("worker is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("worker I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unit of work bound to one descriptor
#[derive(Clone)]
pub enum PathJob {
    /// Read from a node and merge into a path
    Source {
        source: Arc<PathSource>,
        path: Arc<PathCore>,
    },
    /// Write queued records to a node
    Destination(Arc<PathDestination>),
    /// Rate timer of a path
    Timer(Arc<PathTimer>),
}

impl PathJob {
    fn fd(&self) -> Option<RawFd> {
        match self {
            PathJob::Source { source, .. } => source.node().poll_fd(),
            PathJob::Destination(dest) => Some(dest.fd()),
            PathJob::Timer(timer) => Some(timer.fd()),
        }
    }

    fn same_job(&self, other: &PathJob) -> bool {
        match (self, other) {
            (PathJob::Source { source: a, path: p }, PathJob::Source { source: b, path: q }) => {
                Arc::ptr_eq(a, b) && Arc::ptr_eq(p, q)
            }
            (PathJob::Destination(a), PathJob::Destination(b)) => Arc::ptr_eq(a, b),
            (PathJob::Timer(a), PathJob::Timer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for PathJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathJob::Source { source, path } => write!(f, "source '{}' of {}", source.node().name(), path.name()),
            PathJob::Destination(dest) => write!(f, "destination '{}'", dest.node().name()),
            PathJob::Timer(timer) => write!(f, "timer of {}", timer.core().name()),
        }
    }
}

#[derive(Default)]
struct JobTable {
    jobs: Vec<(JobId, PathJob)>,
    generation: u64,
}

/// Poller-side copy of the job table with its descriptor array
struct Snapshot {
    generation: u64,
    jobs: Vec<(JobId, PathJob)>,
    /// Wake-up descriptor first, then one entry per job
    pfds: Vec<libc::pollfd>,
}

pub struct PathWorker {
    table: Mutex<JobTable>,
    snapshot: Mutex<Snapshot>,
    wakeup: EventFd,
    next_id: AtomicU64,
    shutdown: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PathWorker {
    pub fn new() -> Result<Arc<Self>, WorkerError> {
        Ok(Arc::new(Self {
            table: Mutex::new(JobTable::default()),
            snapshot: Mutex::new(Snapshot {
                generation: u64::MAX,
                jobs: Vec::new(),
                pfds: Vec::new(),
            }),
            wakeup: EventFd::new()?,
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            thread: Mutex::new(None),
        }))
    }

    /// Register a job; the running loop picks it up on its next iteration
    pub fn add(&self, job: PathJob) -> Result<JobId, WorkerError> {
        if job.fd().is_none() {
            return Err(WorkerError::NoDescriptor(job.to_string()));
        }

        let mut table = self.table.lock();
        if table.jobs.iter().any(|(_, j)| j.same_job(&job)) {
            return Err(WorkerError::Duplicate(job.to_string()));
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(target: "worker", job = %job, id = %id, "registered job");
        table.jobs.push((id, job));
        table.generation += 1;
        drop(table);

        self.wakeup.signal(1);
        Ok(id)
    }

    pub fn remove(&self, id: JobId) -> Result<(), WorkerError> {
        let mut table = self.table.lock();
        let index = table
            .jobs
            .iter()
            .position(|(j, _)| *j == id)
            .ok_or(WorkerError::UnknownJob(id))?;
        let (_, job) = table.jobs.remove(index);
        table.generation += 1;
        drop(table);

        debug!(target: "worker", job = %job, id = %id, "removed job");
        self.wakeup.signal(1);
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.table.lock().jobs.len()
    }

    fn refresh(&self, snap: &mut Snapshot) {
        let table = self.table.lock();
        if table.generation == snap.generation {
            return;
        }

        snap.jobs = table.jobs.clone();
        snap.generation = table.generation;
        drop(table);

        snap.pfds.clear();
        snap.pfds.push(fd::poll_entry(self.wakeup.as_raw_fd()));
        // poll(2) skips negative descriptors
        snap.pfds
            .extend(snap.jobs.iter().map(|(_, job)| fd::poll_entry(job.fd().unwrap_or(-1))));
        trace!(target: "worker", jobs = snap.jobs.len(), generation = snap.generation, "refreshed job table");
    }

    /// One poll and dispatch round
    ///
    /// Returns how many jobs were ready. Jobs whose descriptor failed or
    /// whose handler returned an error are deregistered.
    pub fn run_once(&self, timeout: Option<Duration>) -> Result<usize, WorkerError> {
        let mut snap = self.snapshot.lock();
        self.refresh(&mut snap);

        fd::poll(&mut snap.pfds, timeout)?;
        if fd::is_readable(&snap.pfds[0]) {
            self.wakeup.drain();
        }

        let snap = &*snap;
        let mut handled = vec![false; snap.jobs.len()];
        let mut failed = Vec::new();
        let mut ready = 0;

        for (i, (id, job)) in snap.jobs.iter().enumerate() {
            if handled[i] {
                continue;
            }
            let pfd = &snap.pfds[i + 1];
            if fd::is_broken(pfd) {
                error!(target: "worker", job = %job, "descriptor failed, removing job");
                failed.push(*id);
                continue;
            }
            if !fd::is_readable(pfd) {
                continue;
            }
            ready += 1;

            match job {
                PathJob::Source { source, path } => {
                    // A node feeding several paths is read once and merged into each
                    let siblings: Vec<usize> = (i + 1..snap.jobs.len())
                        .filter(|&j| match &snap.jobs[j].1 {
                            PathJob::Source { source: other, .. } => same_node(other.node(), source.node()),
                            _ => false,
                        })
                        .collect();

                    match source.read() {
                        Ok(batch) => {
                            source.merge(path, &batch);
                            for &j in &siblings {
                                if let PathJob::Source { source: other, path: p } = &snap.jobs[j].1 {
                                    other.merge(p, &batch);
                                }
                            }
                        }
                        Err(e) => {
                            error!(target: "worker", job = %job, error = %e, "read failed, removing job");
                            failed.push(*id);
                            failed.extend(siblings.iter().map(|&j| snap.jobs[j].0));
                        }
                    }
                    for &j in &siblings {
                        handled[j] = true;
                    }
                }
                PathJob::Destination(dest) => {
                    if let Err(e) = dest.drain() {
                        error!(target: "worker", job = %job, error = %e, "write failed, removing job");
                        failed.push(*id);
                    }
                }
                PathJob::Timer(timer) => {
                    if let Err(e) = timer.tick() {
                        error!(target: "worker", job = %job, error = %e, "timer failed, removing job");
                        failed.push(*id);
                    }
                }
            }
        }

        for id in failed {
            // Already gone if the owning path stopped meanwhile
            let _ = self.remove(id);
        }
        Ok(ready)
    }

    /// Spawn the poll thread
    pub fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Err(WorkerError::AlreadyRunning);
        }
        self.shutdown.store(false, Ordering::Release);

        let worker = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("path-worker".to_string())
            .spawn(move || worker.run())?;
        *thread = Some(handle);

        info!(target: "worker", "path worker started");
        Ok(())
    }

    fn run(&self) {
        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.run_once(Some(POLL_INTERVAL)) {
                error!(target: "worker", error = %e, "poll failed");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Stop and join the poll thread
    pub fn stop(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        self.wakeup.signal(1);

        if handle.join().is_err() {
            error!(target: "worker", "path worker panicked");
        }
        info!(target: "worker", "path worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }
}

impl Drop for PathWorker {
    fn drop(&mut self) {
        // The poll thread owns an Arc, so a running worker is never dropped here
        self.shutdown.store(true, Ordering::Release);
    }
}

impl fmt::Debug for PathWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathWorker")
            .field("jobs", &self.job_count())
            .field("running", &self.is_running())
            .finish()
    }
}
