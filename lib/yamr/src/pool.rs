//! Bounded worker pool with retrievable job results.
//!
//! Workers share one FIFO queue guarded by a mutex and a condition variable.
//! Each enqueue wakes a single idle worker; shutdown wakes all of them. On
//! `stop` every worker keeps draining the queue and exits only once it is
//! empty, so nothing submitted before `stop` is dropped.

use crate::error::{JobError, PoolError};
use crossbeam_channel as channel;
use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    job_available: Condvar,
    completed: Arc<AtomicUsize>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Jobs run outside the lock, so a poisoned queue still holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, job: Job) -> Result<(), PoolError> {
        let mut state = self.lock();
        if state.shutdown {
            return Err(PoolError::NotRunning);
        }
        state.jobs.push_back(job);
        self.job_available.notify_one();
        Ok(())
    }

    fn next_job(&self) -> Option<Job> {
        let mut state = self.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            if state.shutdown {
                return None;
            }
            state = self
                .job_available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct Running {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

/// Fixed-size pool of OS threads consuming jobs from a shared queue.
///
/// The pool is idle after construction. `start(n)` spawns `n` workers,
/// `stop()` drains the queue and joins them, after which the pool may be
/// started again with a different worker count.
pub struct WorkerPool {
    running: Option<Running>,
    completed: Arc<AtomicUsize>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            running: None,
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn start(&mut self, num_workers: usize) -> Result<(), PoolError> {
        if self.running.is_some() {
            return Err(PoolError::AlreadyRunning);
        }
        if num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            job_available: Condvar::new(),
            completed: Arc::clone(&self.completed),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let shared_clone = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("yamr-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, &shared_clone));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    shutdown_and_join(&shared, workers);
                    return Err(PoolError::Spawn {
                        worker: worker_id,
                        source,
                    });
                }
            }
        }

        debug!(workers = num_workers, "worker pool started");
        self.running = Some(Running { shared, workers });
        Ok(())
    }

    /// Signals shutdown and blocks until every worker has drained the queue and exited.
    pub fn stop(&mut self) -> Result<(), PoolError> {
        let running = self.running.take().ok_or(PoolError::NotRunning)?;
        let num_workers = running.workers.len();
        shutdown_and_join(&running.shared, running.workers);
        debug!(
            workers = num_workers,
            completed_jobs = self.completed_jobs(),
            "worker pool stopped"
        );
        Ok(())
    }

    pub fn submit<T, F>(&self, job: F) -> Result<JobHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        match &self.running {
            Some(running) => submit_to(&running.shared, job),
            None => Err(PoolError::NotRunning),
        }
    }

    /// Cloneable submission handle, usable from inside running jobs.
    pub fn submitter(&self) -> Result<Submitter, PoolError> {
        self.running
            .as_ref()
            .map(|running| Submitter {
                shared: Arc::clone(&running.shared),
            })
            .ok_or(PoolError::NotRunning)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn worker_count(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.workers.len())
    }

    /// Jobs finished since construction, across restarts. Diagnostic only.
    pub fn completed_jobs(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            shutdown_and_join(&running.shared, running.workers);
        }
    }
}

/// Submits jobs to the pool run it was created from.
#[derive(Clone)]
pub struct Submitter {
    shared: Arc<Shared>,
}

impl Submitter {
    pub fn submit<T, F>(&self, job: F) -> Result<JobHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        submit_to(&self.shared, job)
    }
}

/// One-shot result cell for a submitted job.
///
/// The value is handed out at most once: after `try_wait` returned `Some`,
/// later calls report `JobError::Abandoned`.
pub struct JobHandle<T> {
    rx: channel::Receiver<Result<T, JobError>>,
    taken: Cell<bool>,
}

impl<T> JobHandle<T> {
    pub fn wait(self) -> Result<T, JobError> {
        self.rx.recv().unwrap_or(Err(JobError::Abandoned))
    }

    /// Returns `None` if the job has not finished within `timeout`, handing the handle back.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<T, JobError>, Self> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(channel::RecvTimeoutError::Timeout) => Err(self),
            Err(channel::RecvTimeoutError::Disconnected) => Ok(Err(JobError::Abandoned)),
        }
    }

    pub fn try_wait(&self) -> Option<Result<T, JobError>> {
        match self.rx.try_recv() {
            Ok(result) => {
                self.taken.set(true);
                Some(result)
            }
            Err(channel::TryRecvError::Empty) => None,
            Err(channel::TryRecvError::Disconnected) => Some(Err(JobError::Abandoned)),
        }
    }

    /// True once the job has produced its result, including after `try_wait` took it.
    pub fn is_finished(&self) -> bool {
        self.taken.get() || !self.rx.is_empty()
    }
}

fn submit_to<T, F>(shared: &Shared, job: F) -> Result<JobHandle<T>, PoolError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let (tx, rx) = channel::bounded(1);
    let wrapped: Job = Box::new(move || {
        let result = match catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(JobError::Failed(e)),
            Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
        };
        // The submitter may have dropped its handle.
        let _ = tx.send(result);
    });
    shared.enqueue(wrapped)?;
    Ok(JobHandle {
        rx,
        taken: Cell::new(false),
    })
}

fn worker_loop(worker_id: usize, shared: &Shared) {
    while let Some(job) = shared.next_job() {
        job();
        shared.completed.fetch_add(1, Ordering::Relaxed);
    }
    debug!(worker_id, "worker exiting");
}

fn shutdown_and_join(shared: &Shared, workers: Vec<thread::JoinHandle<()>>) {
    {
        let mut state = shared.lock();
        state.shutdown = true;
    }
    shared.job_available.notify_all();
    for handle in workers {
        if handle.join().is_err() {
            error!("worker thread terminated abnormally");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Barrier;

    #[test]
    fn all_jobs_complete_before_stop_returns() {
        let mut pool = WorkerPool::new();
        pool.start(4).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..200)
            .map(|i| {
                let runs = Arc::clone(&runs);
                pool.submit(move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(i * 2)
                })
                .unwrap()
            })
            .collect();
        pool.stop().unwrap();

        assert!(handles.iter().all(|h| h.is_finished()));
        let values: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(values, (0..200).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(runs.load(Ordering::SeqCst), 200);
        assert_eq!(pool.completed_jobs(), 200);
    }

    #[test]
    fn jobs_run_on_multiple_workers_concurrently() {
        let mut pool = WorkerPool::new();
        pool.start(3).unwrap();
        // Deadlocks unless three jobs run at the same time.
        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                pool.submit(move || {
                    barrier.wait();
                    Ok(thread::current().name().map(str::to_string))
                })
                .unwrap()
            })
            .collect();
        pool.stop().unwrap();
        let names: HashSet<_> = handles
            .into_iter()
            .map(|h| h.wait().unwrap().unwrap())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("yamr-worker-")));
    }

    #[test]
    fn failures_and_panics_are_captured_per_job() {
        let mut pool = WorkerPool::new();
        pool.start(1).unwrap();
        let failed = pool.submit(|| -> anyhow::Result<()> { anyhow::bail!("bad record") }).unwrap();
        let panicked = pool.submit(|| -> anyhow::Result<()> { panic!("boom") }).unwrap();
        let ok = pool.submit(|| Ok("still alive")).unwrap();
        pool.stop().unwrap();

        assert!(matches!(failed.wait(), Err(JobError::Failed(e)) if e.to_string() == "bad record"));
        assert!(matches!(panicked.wait(), Err(JobError::Panicked(m)) if m == "boom"));
        assert_eq!(ok.wait().unwrap(), "still alive");
        assert_eq!(pool.completed_jobs(), 3);
    }

    #[test]
    fn lifecycle_misuse_is_rejected() {
        let mut pool = WorkerPool::new();
        assert!(matches!(pool.submit(|| Ok(())), Err(PoolError::NotRunning)));
        assert!(matches!(pool.stop(), Err(PoolError::NotRunning)));
        assert!(matches!(pool.start(0), Err(PoolError::NoWorkers)));
        pool.start(2).unwrap();
        assert!(matches!(pool.start(2), Err(PoolError::AlreadyRunning)));
        pool.stop().unwrap();
        assert!(!pool.is_running());
    }

    #[test]
    fn restarts_with_a_different_worker_count() {
        let mut pool = WorkerPool::new();
        pool.start(2).unwrap();
        assert_eq!(pool.worker_count(), 2);
        let first = pool.submit(|| Ok(1)).unwrap();
        pool.stop().unwrap();

        pool.start(5).unwrap();
        assert_eq!(pool.worker_count(), 5);
        let second = pool.submit(|| Ok(2)).unwrap();
        pool.stop().unwrap();

        assert_eq!(first.wait().unwrap() + second.wait().unwrap(), 3);
        assert_eq!(pool.completed_jobs(), 2);
    }

    #[test]
    fn jobs_can_submit_follow_up_jobs() {
        let mut pool = WorkerPool::new();
        pool.start(2).unwrap();
        let submitter = pool.submitter().unwrap();
        let outer = pool
            .submit(move || {
                let inner = submitter.submit(|| Ok(21))?;
                Ok(inner)
            })
            .unwrap();
        let inner = outer.wait().unwrap();
        assert_eq!(inner.wait().unwrap(), 21);
        pool.stop().unwrap();
    }

    #[test]
    fn stale_submitter_is_rejected_after_stop() {
        let mut pool = WorkerPool::new();
        pool.start(1).unwrap();
        let submitter = pool.submitter().unwrap();
        pool.stop().unwrap();
        pool.start(1).unwrap();
        assert!(matches!(submitter.submit(|| Ok(())), Err(PoolError::NotRunning)));
        pool.stop().unwrap();
    }

    #[test]
    fn try_wait_polls_without_blocking() {
        let mut pool = WorkerPool::new();
        pool.start(1).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let job_gate = Arc::clone(&gate);
        let handle = pool
            .submit(move || {
                job_gate.wait();
                Ok(7)
            })
            .unwrap();
        assert!(handle.try_wait().is_none());
        assert!(!handle.is_finished());
        let handle = handle.wait_timeout(Duration::from_millis(10)).unwrap_err();
        gate.wait();
        pool.stop().unwrap();
        assert_eq!(handle.try_wait().unwrap().unwrap(), 7);
        assert!(matches!(handle.try_wait(), Some(Err(JobError::Abandoned))));
    }

    #[test]
    fn handle_stays_finished_after_its_value_is_taken() {
        let mut pool = WorkerPool::new();
        pool.start(1).unwrap();
        let handle = pool.submit(|| Ok(1)).unwrap();
        pool.stop().unwrap();
        assert!(handle.is_finished());
        assert_eq!(handle.try_wait().unwrap().unwrap(), 1);
        assert!(handle.is_finished());
    }
}
