// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Fixed size worker pool executing boxed closures.
//!
//! Two ways of waiting for work are supported:
//! - `is_complete()` polling for callers driven by an external frame loop,
//! - `run_batch()` which blocks on a [`Latch`] until every job of the batch
//!   has finished, with a bound that turns a lost completion into a
//!   [`BenchError::SyncFault`].
//!
//! A job that panics only ends that job. The panic is logged and
//! swallowed, nothing is reported to the waiters.

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{BenchError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    /// Queued plus running jobs.
    outstanding: usize,
    disposed: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    /// Signalled when a job is queued or the pool is disposed.
    job_ready: Condvar,
    /// Signalled when `outstanding` drops to zero.
    idle: Condvar,
}

pub struct JobPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

/// Outcome of `JobPool::dispose`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Teardown {
    /// Queued jobs that never ran.
    pub dropped_jobs: usize,
    /// Workers whose join reported a panic.
    pub abnormal_exits: usize,
}

impl JobPool {
    /// Spawn `worker_count` long lived worker threads.
    pub fn new(worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(BenchError::config("job pool needs at least one worker"));
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                outstanding: 0,
                disposed: false,
            }),
            job_ready: Condvar::new(),
            idle: Condvar::new(),
        });
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("bench-worker-{}", index))
                .spawn(move || worker_loop(&shared, index))?;
            workers.push(handle);
        }
        debug!("Job pool started with {} workers", worker_count);
        Ok(JobPool { shared, workers })
    }

    /// Number of live worker threads. Zero after `dispose()`.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue a job. Fails only once the pool has been disposed.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.disposed {
            return Err(BenchError::PoolDisposed);
        }
        state.queue.push_back(Box::new(job));
        state.outstanding += 1;
        self.shared.job_ready.notify_one();
        Ok(())
    }

    /// Queued plus running jobs.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Non-blocking completion check for frame driven callers.
    pub fn is_complete(&self) -> bool {
        self.outstanding() == 0
    }

    /// Block until every queued and running job has finished.
    /// Must not be called from inside a job of this pool.
    pub fn wait_until_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.outstanding != 0 {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Like `wait_until_idle` but gives up after `timeout`.
    pub fn wait_until_idle_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.outstanding != 0 {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out()
                && state.outstanding != 0
            {
                return Err(BenchError::sync_fault("pool idle wait", timeout));
            }
        }
        Ok(())
    }

    /// Submit every job of `jobs` and block until all of them finished.
    /// Not finishing within `timeout` is a synchronization fault.
    pub fn run_batch<F>(&self, jobs: Vec<F>, stage: &'static str, timeout: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let latch = Arc::new(Latch::new(jobs.len()));
        for job in jobs {
            let guard = LatchGuard(Arc::clone(&latch));
            self.submit(move || {
                let _guard = guard;
                job();
            })?;
        }
        if latch.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(BenchError::sync_fault(stage, timeout))
        }
    }

    /// Signal termination without joining.
    /// Queued jobs that no worker has picked up yet are dropped, their count is returned.
    pub fn shutdown(&self) -> usize {
        let dropped = {
            let mut state = self.shared.state.lock();
            state.disposed = true;
            let dropped = std::mem::take(&mut state.queue);
            state.outstanding -= dropped.len();
            if state.outstanding == 0 {
                self.shared.idle.notify_all();
            }
            self.shared.job_ready.notify_all();
            dropped
        };
        // Dropping outside the lock, job captures may release latches.
        dropped.len()
    }

    /// Signal termination and join every worker.
    /// Running jobs finish, queued ones never run.
    pub fn dispose(&mut self) -> Teardown {
        let dropped_jobs = self.shutdown();
        let mut abnormal_exits = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread terminated abnormally");
                abnormal_exits += 1;
            }
        }
        debug!("Job pool disposed, {} queued jobs dropped", dropped_jobs);
        Teardown {
            dropped_jobs,
            abnormal_exits,
        }
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.dispose();
        }
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.disposed {
                    return;
                }
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                shared.job_ready.wait(&mut state);
            }
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            warn!(worker = index, "Job panicked: {}", panic_message(payload.as_ref()));
        }
        let mut state = shared.state.lock();
        state.outstanding -= 1;
        if state.outstanding == 0 {
            shared.idle.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic>"
    }
}

/// Counting completion semaphore, released once `count_down` was called `count` times.
pub struct Latch {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Latch {
            remaining: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.released.notify_all();
        }
    }

    /// Returns false if the latch was still held after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining != 0 {
            if self.released.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }
}

/// Counts the latch down when the owning job ends, including by panic or drop.
struct LatchGuard(Arc<Latch>);

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WORKERS: usize = 4;
    const GENEROUS: Duration = Duration::from_secs(30);

    #[test]
    fn runs_every_job() {
        let pool = JobPool::new(WORKERS).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1000);
        assert!(pool.is_complete());
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(matches!(JobPool::new(0), Err(BenchError::InvalidConfig(_))));
    }

    #[test]
    fn polling_until_complete() {
        let pool = JobPool::new(WORKERS).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..WORKERS * 2 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        while !pool.is_complete() {
            thread::yield_now();
        }
        assert_eq!(counter.load(Ordering::SeqCst), WORKERS * 2);
    }

    #[test]
    fn batch_of_worker_count_never_misses_wakeup() {
        let pool = JobPool::new(WORKERS).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for cycle in 0..10_000 {
            let jobs: Vec<_> = (0..WORKERS)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .collect();
            pool.run_batch(jobs, "stress", GENEROUS).unwrap();
            assert_eq!(counter.load(Ordering::SeqCst), (cycle + 1) * WORKERS);
        }
    }

    #[test]
    fn idle_wait_cycles() {
        let pool = JobPool::new(WORKERS).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for cycle in 0..10_000 {
            for _ in 0..WORKERS {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
            pool.wait_until_idle_timeout(GENEROUS).unwrap();
            assert_eq!(counter.load(Ordering::SeqCst), (cycle + 1) * WORKERS);
        }
    }

    #[test]
    fn panicking_job_is_swallowed() {
        let pool = JobPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(|| panic!("job failure")).unwrap();
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.wait_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // The panicking job still releases its batch.
        let jobs: Vec<Box<dyn FnOnce() + Send>> =
            vec![Box::new(|| panic!("again")), Box::new(|| {})];
        pool.run_batch(jobs, "panic batch", GENEROUS).unwrap();
        assert_eq!(pool.worker_count(), 2);
    }

    #[test]
    fn stuck_batch_is_a_sync_fault() {
        let pool = JobPool::new(1).unwrap();
        let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(0);
        let jobs = vec![move || {
            let _ = gate_rx.recv();
        }];
        let err = pool
            .run_batch(jobs, "stuck", Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_fatal());
        drop(gate_tx);
        pool.wait_until_idle();
    }

    #[test]
    fn dispose_drops_queued_jobs() {
        let mut pool = JobPool::new(1).unwrap();
        let (started_tx, started_rx) = crossbeam::channel::bounded::<()>(1);
        let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(0);
        let finished = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finished);
        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv();
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        started_rx.recv().unwrap();

        let queued = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let queued = Arc::clone(&queued);
            pool.submit(move || {
                queued.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(pool.shutdown(), 5);
        assert!(matches!(pool.submit(|| {}), Err(BenchError::PoolDisposed)));
        drop(gate_tx);
        let teardown = pool.dispose();

        assert_eq!(teardown.abnormal_exits, 0);
        // already taken by shutdown
        assert_eq!(teardown.dropped_jobs, 0);
        assert_eq!(pool.worker_count(), 0);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(queued.load(Ordering::SeqCst), 0);
        assert!(pool.is_complete());
        // a second dispose has nothing left to join
        assert_eq!(pool.dispose(), Teardown::default());
    }

    #[test]
    fn dispose_reports_queued_jobs_and_clean_joins() {
        let mut pool = JobPool::new(2).unwrap();
        let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam::channel::bounded::<()>(2);
        for _ in 0..2 {
            let gate_rx = gate_rx.clone();
            let started_tx = started_tx.clone();
            pool.submit(move || {
                started_tx.send(()).unwrap();
                let _ = gate_rx.recv();
            })
            .unwrap();
        }
        started_rx.recv().unwrap();
        started_rx.recv().unwrap();
        for _ in 0..3 {
            pool.submit(|| {}).unwrap();
        }
        // both workers hold their gate job until after the queue is taken
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(gate_tx);
        });
        let teardown = pool.dispose();
        releaser.join().unwrap();
        assert_eq!(teardown.abnormal_exits, 0);
        assert_eq!(teardown.dropped_jobs, 3);
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn latch_counts_down() {
        let latch = Latch::new(2);
        latch.count_down();
        assert!(!latch.wait_timeout(Duration::from_millis(1)));
        latch.count_down();
        assert!(latch.wait_timeout(Duration::from_millis(1)));
        // further count downs saturate
        latch.count_down();
        assert!(latch.wait_timeout(Duration::ZERO));
    }
}
