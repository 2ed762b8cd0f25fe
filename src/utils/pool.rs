//! A priority-ordered worker pool.
//!
//! This module provides [`PriorityThreadPool`], the dispatcher behind the inliner's
//! bottom-up schedule. Tasks are plain values; a single handler runs them and may submit
//! follow-up tasks while the pool is draining.
//!
//! # Design Principles
//!
//! - **Priority Dispatch**: The highest priority pending task runs next; ties run first-in,
//!   first-out
//! - **Fail-Fast Behavior**: The first handler error stops all further dispatch and is
//!   returned to the caller; a panicking handler counts as an error
//! - **No Blocking Between Tasks**: Workers only ever wait for the queue, never for another
//!   task; dependencies are expressed by submitting follow-up tasks
//! - **Sequential Mode**: A pool of size 0 runs every task on the calling thread, in the same
//!   order a single worker would

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{Error, Result};

struct Job<T> {
    priority: usize,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Job<T> {}

impl<T> PartialOrd for Job<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Job<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolState<T> {
    queue: BinaryHeap<Job<T>>,
    next_seq: u64,
    running: usize,
    error: Option<Error>,
    waited: Duration,
}

/// A bounded pool of workers dispatching tasks by priority.
///
/// # Examples
///
/// ```rust
/// use std::sync::Mutex;
/// use dexopt::utils::PriorityThreadPool;
///
/// let pool = PriorityThreadPool::new(0);
/// pool.submit(1, "low")?;
/// pool.submit(5, "high")?;
///
/// let order = Mutex::new(Vec::new());
/// pool.run_to_completion(|_, task| {
///     order.lock().unwrap().push(task);
///     Ok(())
/// })?;
/// assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
/// # Ok::<(), dexopt::Error>(())
/// ```
pub struct PriorityThreadPool<T> {
    num_threads: usize,
    state: Mutex<PoolState<T>>,
    available: Condvar,
}

impl<T: Send> PriorityThreadPool<T> {
    /// Creates a pool with `num_threads` workers; 0 means sequential execution.
    #[must_use]
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads,
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                running: 0,
                error: None,
                waited: Duration::ZERO,
            }),
            available: Condvar::new(),
        }
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState<T>>> {
        self.state.lock().map_err(|_| Error::LockError)
    }

    /// Queues a task.
    ///
    /// # Arguments
    ///
    /// * `priority` - Higher values are dispatched first.
    /// * `task` - The value passed to the handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a worker panicked while holding the queue.
    pub fn submit(&self, priority: usize, task: T) -> Result<()> {
        let mut state = self.lock()?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Job {
            priority,
            seq,
            task,
        });
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Number of queued tasks not yet dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the queue is poisoned.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.queue.len())
    }

    /// Total time workers spent idle waiting for tasks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the queue is poisoned.
    pub fn waited(&self) -> Result<Duration> {
        Ok(self.lock()?.waited)
    }

    /// Runs queued tasks, and every task they submit, until the queue is drained.
    ///
    /// # Arguments
    ///
    /// * `handler` - Runs one task; receives the pool so it can submit follow-ups.
    ///
    /// # Errors
    ///
    /// Returns the first error a handler returned. Tasks still queued at that point are
    /// discarded. Returns [`Error::LockError`] if the queue is poisoned and
    /// [`Error::Error`] if a worker panicked.
    pub fn run_to_completion<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Self, T) -> Result<()> + Sync,
    {
        if self.num_threads == 0 {
            return self.run_sequential(&handler);
        }

        let results: Vec<Result<()>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..self.num_threads)
                .map(|_| s.spawn(|| self.worker(&handler)))
                .collect();
            workers
                .into_iter()
                .map(|w| {
                    w.join()
                        .unwrap_or_else(|_| Err(Error::Error("Worker thread panicked".to_string())))
                })
                .collect()
        });

        let mut state = self.lock()?;
        state.queue.clear();
        if let Some(error) = state.error.take() {
            return Err(error);
        }
        drop(state);
        results.into_iter().collect()
    }

    fn run_sequential<F>(&self, handler: &F) -> Result<()>
    where
        F: Fn(&Self, T) -> Result<()>,
    {
        loop {
            let job = self.lock()?.queue.pop();
            let Some(job) = job else {
                return Ok(());
            };
            if let Err(error) = self.handle(handler, job.task) {
                self.lock()?.queue.clear();
                return Err(error);
            }
        }
    }

    fn handle<F>(&self, handler: &F, task: T) -> Result<()>
    where
        F: Fn(&Self, T) -> Result<()>,
    {
        // an unwinding handler would otherwise leave `running` raised forever
        catch_unwind(AssertUnwindSafe(|| handler(self, task)))
            .unwrap_or_else(|_| Err(Error::Error("worker panicked".to_string())))
    }

    fn worker<F>(&self, handler: &F) -> Result<()>
    where
        F: Fn(&Self, T) -> Result<()>,
    {
        loop {
            let task = {
                let mut state = self.lock()?;
                loop {
                    if state.error.is_some() {
                        return Ok(());
                    }
                    if let Some(job) = state.queue.pop() {
                        state.running += 1;
                        break job.task;
                    }
                    if state.running == 0 {
                        // nothing queued and nothing that could queue more
                        self.available.notify_all();
                        return Ok(());
                    }
                    let started = Instant::now();
                    state = self.available.wait(state).map_err(|_| Error::LockError)?;
                    state.waited += started.elapsed();
                }
            };

            let result = self.handle(handler, task);

            let mut state = self.lock()?;
            state.running -= 1;
            if let Err(error) = result {
                if state.error.is_none() {
                    state.error = Some(error);
                }
            }
            drop(state);
            self.available.notify_all();
        }
    }
}
