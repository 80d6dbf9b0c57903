//! Thread pool implementation for parallel execution.
//!
//! The pool is the default [`Scheduler`] behind a parallel group. Tasks are
//! queued on an unbounded channel and picked up by a fixed set of worker
//! threads. Shutting down closes the queue: workers finish what is already
//! queued and then exit.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, trace};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use weft_core::config::ThreadPoolConfig;
use weft_core::error::{BodyError, Error, Result};
use weft_core::traits::{Scheduler, Task};

/// Error when creating or submitting to the thread pool
#[derive(Error, Debug)]
pub enum ThreadPoolError {
    /// The thread pool is shutting down
    #[error("thread pool is shutting down")]
    ShuttingDown,

    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// The pool was configured with no workers
    #[error("thread pool needs at least one worker")]
    NoWorkers,
}

impl From<ThreadPoolError> for Error {
    fn from(error: ThreadPoolError) -> Self {
        Error::Runtime(error.to_string())
    }
}

/// Statistics about the thread pool
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThreadPoolStats {
    /// Number of tasks queued
    pub tasks_queued: u64,

    /// Number of tasks completed
    pub tasks_completed: u64,

    /// Number of tasks that panicked
    pub tasks_panicked: u64,

    /// Total task execution time (microseconds)
    pub total_execution_time_us: u64,

    /// Queue wait time (microseconds)
    pub total_queue_time_us: u64,

    /// Maximum task execution time (microseconds)
    pub max_execution_time_us: u64,
}

#[derive(Default)]
struct Counters {
    tasks_queued: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_panicked: AtomicU64,
    total_execution_time_us: AtomicU64,
    total_queue_time_us: AtomicU64,
    max_execution_time_us: AtomicU64,
}

/// Task with metadata for tracking
struct Job {
    func: Task,
    enqueued_at: Instant,
}

/// A fixed-size pool of worker threads
pub struct ThreadPool {
    /// Queue sender; `None` once the pool is shutting down
    sender: RwLock<Option<Sender<Job>>>,

    /// Worker threads, taken by `shutdown_and_join`
    workers: Mutex<Vec<JoinHandle<()>>>,

    worker_count: usize,

    counters: Arc<Counters>,

    config: ThreadPoolConfig,
}

impl ThreadPool {
    /// Create a pool with `threads` workers and default settings otherwise
    pub fn new(threads: usize) -> std::result::Result<Self, ThreadPoolError> {
        Self::with_config(ThreadPoolConfig {
            max_threads: threads,
            ..Default::default()
        })
    }

    /// Create a pool with the specified configuration
    pub fn with_config(config: ThreadPoolConfig) -> std::result::Result<Self, ThreadPoolError> {
        if config.max_threads == 0 {
            return Err(ThreadPoolError::NoWorkers);
        }

        let (sender, receiver) = unbounded();
        let counters = Arc::new(Counters::default());

        info!(
            "Creating thread pool '{}' with {} workers",
            config.thread_name_prefix, config.max_threads
        );

        let mut workers = Vec::with_capacity(config.max_threads);
        for id in 0..config.max_threads {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let collect_stats = config.collect_stats;

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, id))
                .spawn(move || Self::worker_loop(id, receiver, counters, collect_stats));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Close the queue so the workers already running exit.
                    drop(sender);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            worker_count: workers.len(),
            workers: Mutex::new(workers),
            counters,
            config,
        })
    }

    /// Worker thread main loop; returns when the queue is closed and drained
    fn worker_loop(id: usize, receiver: Receiver<Job>, counters: Arc<Counters>, collect_stats: bool) {
        debug!("Worker {}: Starting", id);

        for job in receiver.iter() {
            let queue_time = job.enqueued_at.elapsed();
            trace!(
                "Worker {}: Executing task (queue time: {:.2}ms)",
                id,
                queue_time.as_micros() as f64 / 1000.0
            );

            let exec_start = Instant::now();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job.func));
            let exec_time_us = exec_start.elapsed().as_micros() as u64;

            if collect_stats {
                counters
                    .total_queue_time_us
                    .fetch_add(queue_time.as_micros() as u64, Ordering::Relaxed);
                counters
                    .total_execution_time_us
                    .fetch_add(exec_time_us, Ordering::Relaxed);
                counters
                    .max_execution_time_us
                    .fetch_max(exec_time_us, Ordering::Relaxed);
            }

            match result {
                Ok(()) => {
                    if collect_stats {
                        counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(payload) => {
                    error!("Worker {}: Task {}", id, BodyError::from_panic(payload));
                    if collect_stats {
                        counters.tasks_panicked.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        debug!("Worker {}: Shutting down", id);
    }

    /// Submit a task to be executed by the pool
    pub fn execute<F>(&self, f: F) -> std::result::Result<(), ThreadPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(ThreadPoolError::ShuttingDown)?;

        sender
            .send(Job {
                func: Box::new(f),
                enqueued_at: Instant::now(),
            })
            .map_err(|_| ThreadPoolError::ShuttingDown)?;

        if self.config.collect_stats {
            self.counters.tasks_queued.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Get current statistics for the pool
    pub fn get_stats(&self) -> ThreadPoolStats {
        if !self.config.collect_stats {
            return ThreadPoolStats::default();
        }
        let c = &self.counters;
        ThreadPoolStats {
            tasks_queued: c.tasks_queued.load(Ordering::Relaxed),
            tasks_completed: c.tasks_completed.load(Ordering::Relaxed),
            tasks_panicked: c.tasks_panicked.load(Ordering::Relaxed),
            total_execution_time_us: c.total_execution_time_us.load(Ordering::Relaxed),
            total_queue_time_us: c.total_queue_time_us.load(Ordering::Relaxed),
            max_execution_time_us: c.max_execution_time_us.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting tasks. Already queued tasks still run.
    pub fn shutdown(&self) {
        if self.sender.write().take().is_some() {
            info!("Shutting down thread pool '{}'", self.config.thread_name_prefix);
        }
    }

    /// Shut down and wait for every worker to drain the queue and exit.
    ///
    /// When called from one of the pool's own workers, that worker is not
    /// waited for.
    pub fn shutdown_and_join(&self) {
        self.shutdown();

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if let Err(e) = worker.join() {
                error!("Worker thread panicked during shutdown: {:?}", e);
            }
        }

        info!("Thread pool '{}' shutdown complete", self.config.thread_name_prefix);
    }

    /// Get the number of worker threads
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Check if the pool is shutting down
    pub fn is_shutting_down(&self) -> bool {
        self.sender.read().is_none()
    }
}

impl Scheduler for ThreadPool {
    fn schedule(&self, task: Task) -> Result<()> {
        self.execute(task).map_err(Error::from)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Workers exit on their own once the queue is closed and empty.
        self.shutdown();
        debug!("Thread pool dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    #[test]
    fn test_thread_pool_basic() {
        let pool = ThreadPool::new(4).unwrap();
        assert_eq!(pool.worker_count(), 4);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        pool.execute(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.shutdown_and_join();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queued_tasks_drain_on_shutdown() {
        let pool = ThreadPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let counter = counter.clone();
            pool.execute(move || {
                thread::sleep(Duration::from_millis(2));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown_and_join();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_thread_pool_panic_handling() {
        let pool = ThreadPool::new(1).unwrap();

        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = flag.clone();

        // Task 1: Panics
        pool.execute(|| {
            panic!("This task should panic");
        })
        .unwrap();

        // Task 2: Should still run on the same worker
        pool.execute(move || {
            flag_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

        pool.shutdown_and_join();

        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(pool.get_stats().tasks_panicked, 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = ThreadPool::new(2).unwrap();
        pool.shutdown();
        assert!(pool.is_shutting_down());

        let result = pool.execute(|| {});
        assert!(matches!(result, Err(ThreadPoolError::ShuttingDown)));

        let scheduled = pool.schedule(Box::new(|| {}));
        assert!(matches!(scheduled, Err(Error::Runtime(_))));
    }

    #[test]
    fn test_thread_pool_stats() {
        let pool = ThreadPool::new(1).unwrap();

        for _ in 0..5 {
            pool.execute(|| {
                thread::sleep(Duration::from_millis(10));
            })
            .unwrap();
        }
        pool.execute(|| {
            panic!("This task should panic");
        })
        .unwrap();

        pool.shutdown_and_join();

        let stats = pool.get_stats();
        assert_eq!(stats.tasks_queued, 6);
        assert_eq!(stats.tasks_completed, 5);
        assert_eq!(stats.tasks_panicked, 1);
        assert!(stats.total_execution_time_us > 0);
        assert!(stats.max_execution_time_us > 0);
    }

    #[test]
    fn test_stats_disabled() {
        let pool = ThreadPool::with_config(ThreadPoolConfig {
            max_threads: 1,
            thread_name_prefix: "quiet".to_string(),
            collect_stats: false,
        })
        .unwrap();

        pool.execute(|| {}).unwrap();
        pool.shutdown_and_join();
        assert_eq!(pool.get_stats(), ThreadPoolStats::default());
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(ThreadPool::new(0), Err(ThreadPoolError::NoWorkers)));
    }

    #[test]
    fn test_shutdown_and_join_from_worker() {
        let pool = Arc::new(ThreadPool::new(2).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let (pool_clone, done_clone) = (pool.clone(), done.clone());
        pool.execute(move || {
            pool_clone.shutdown_and_join();
            done_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(done.load(Ordering::SeqCst));
    }
}
