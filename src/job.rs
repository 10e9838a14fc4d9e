// job.rs - Cooperative job scheduler
// =========================================================================
//
// Sessions and tags make progress by being polled. Each one submits a job: a
// closure that performs one step of its state machine and reports whether it
// wants to run again. Two fixed pools of OS threads scan two job lists, one
// for work that may block on sockets and one for short non-blocking work.
//
// A worker claims a job by moving it Waiting -> Running, calls it once with
// no list lock held, then puts it back to Waiting or marks it Dead. Dead jobs
// are dropped from the list on the next pass, which releases whatever the
// closure captured. Jobs are never interrupted mid-call.

use crate::config::SchedulerConfig;
use crate::error::{EipError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

const JOB_WAITING: u8 = 0;
const JOB_RUNNING: u8 = 1;
const JOB_DEAD: u8 = 2;

/// Which worker pool services a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobClass {
    /// Short steps that never block (tag state machines)
    NonBlocking,
    /// Steps that may block a worker thread on I/O (session sockets)
    Blocking,
}

/// Value returned by a job step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Run the job again on a later pass
    Reschedule,
    /// The job is finished and can be dropped
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Running,
    Dead,
}

type JobFn = Box<dyn FnMut() -> JobStatus + Send>;

struct Job {
    name: String,
    class: JobClass,
    state: AtomicU8,
    cancelled: AtomicBool,
    func: Mutex<JobFn>,
}

impl Job {
    fn state(&self) -> JobState {
        match self.state.load(Ordering::Acquire) {
            JOB_WAITING => JobState::Waiting,
            JOB_RUNNING => JobState::Running,
            _ => JobState::Dead,
        }
    }

    fn try_claim(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            if self
                .state
                .compare_exchange(JOB_WAITING, JOB_DEAD, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.retire();
            }
            return false;
        }
        self.state
            .compare_exchange(JOB_WAITING, JOB_RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn run_once(&self) {
        let status = {
            let mut func = self.func.lock();
            (func)()
        };
        let next = if status == JobStatus::Done || self.cancelled.load(Ordering::Acquire) {
            JOB_DEAD
        } else {
            JOB_WAITING
        };
        if next == JOB_DEAD {
            self.retire();
        }
        self.state.store(next, Ordering::Release);
    }

    /// Drops whatever the step closure captured
    fn retire(&self) {
        *self.func.lock() = Box::new(|| JobStatus::Done);
    }
}

/// Handle to a submitted job
#[derive(Clone)]
pub struct JobHandle {
    job: Arc<Job>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn class(&self) -> JobClass {
        self.job.class
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    pub fn is_dead(&self) -> bool {
        self.state() == JobState::Dead
    }

    /// Stops the job from being scheduled again. A step already running is
    /// allowed to finish.
    pub fn cancel(&self) {
        self.job.cancelled.store(true, Ordering::Release);
        if self
            .job
            .state
            .compare_exchange(JOB_WAITING, JOB_DEAD, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.job.retire();
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.job.name)
            .field("class", &self.job.class)
            .field("state", &self.job.state())
            .finish()
    }
}

#[derive(Default)]
struct JobList {
    jobs: Mutex<Vec<Arc<Job>>>,
}

impl JobList {
    /// Drops dead jobs and returns the remaining ones, lowest index first
    fn snapshot(&self) -> Vec<Arc<Job>> {
        let mut jobs = self.jobs.lock();
        jobs.retain(|job| job.state() != JobState::Dead);
        jobs.clone()
    }
}

/// Poll-driven scheduler with a blocking and a non-blocking worker pool
pub struct Scheduler {
    nonblocking: Arc<JobList>,
    blocking: Arc<JobList>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Result<Arc<Self>> {
        let scheduler = Arc::new(Self {
            nonblocking: Arc::new(JobList::default()),
            blocking: Arc::new(JobList::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        });

        let idle = config.idle_sleep();
        let mut workers = Vec::new();
        for i in 0..config.nonblocking_workers {
            workers.push(scheduler.spawn_worker(
                format!("eip-worker-{}", i),
                Arc::clone(&scheduler.nonblocking),
                idle,
            )?);
        }
        for i in 0..config.blocking_workers {
            workers.push(scheduler.spawn_worker(
                format!("eip-io-worker-{}", i),
                Arc::clone(&scheduler.blocking),
                idle,
            )?);
        }
        *scheduler.workers.lock() = workers;

        tracing::debug!(
            nonblocking = config.nonblocking_workers,
            blocking = config.blocking_workers,
            "scheduler started"
        );
        Ok(scheduler)
    }

    fn spawn_worker(
        &self,
        name: String,
        list: Arc<JobList>,
        idle: Duration,
    ) -> Result<JoinHandle<()>> {
        let shutdown = Arc::clone(&self.shutdown);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&name, &list, &shutdown, idle))
            .map_err(|e| EipError::Io(format!("Unable to start worker thread: {}", e)))
    }

    /// Queues `step` to be called repeatedly until it returns
    /// [`JobStatus::Done`] or the job is cancelled.
    pub fn submit<F>(&self, name: impl Into<String>, class: JobClass, step: F) -> Result<JobHandle>
    where
        F: FnMut() -> JobStatus + Send + 'static,
    {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(EipError::NotAllowed(
                "scheduler is shut down".to_string(),
            ));
        }

        let job = Arc::new(Job {
            name: name.into(),
            class,
            state: AtomicU8::new(JOB_WAITING),
            cancelled: AtomicBool::new(false),
            func: Mutex::new(Box::new(step)),
        });
        tracing::trace!(job = %job.name, ?class, "job submitted");

        self.list(class).jobs.lock().push(Arc::clone(&job));
        Ok(JobHandle { job })
    }

    fn list(&self, class: JobClass) -> &JobList {
        match class {
            JobClass::NonBlocking => &self.nonblocking,
            JobClass::Blocking => &self.blocking,
        }
    }

    /// Number of jobs that are not yet dead
    pub fn job_count(&self, class: JobClass) -> usize {
        self.list(class)
            .jobs
            .lock()
            .iter()
            .filter(|job| job.state() != JobState::Dead)
            .count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stops the workers and drops every queued job. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let current: ThreadId = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            // The last owner may be dropped from inside a job step.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("scheduler worker panicked");
            }
        }

        let nonblocking: Vec<_> = self.nonblocking.jobs.lock().drain(..).collect();
        let blocking: Vec<_> = self.blocking.jobs.lock().drain(..).collect();
        tracing::debug!(
            dropped = nonblocking.len() + blocking.len(),
            "scheduler shut down"
        );
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("nonblocking_jobs", &self.job_count(JobClass::NonBlocking))
            .field("blocking_jobs", &self.job_count(JobClass::Blocking))
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn worker_loop(name: &str, list: &JobList, shutdown: &AtomicBool, idle: Duration) {
    tracing::trace!(worker = name, "worker started");

    while !shutdown.load(Ordering::Acquire) {
        for job in list.snapshot() {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            if job.try_claim() {
                job.run_once();
            }
        }
        thread::sleep(idle);
    }

    tracing::trace!(worker = name, "worker stopped");
}
