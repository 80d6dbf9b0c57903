//! Parallel groups.
//!
//! A group binds actors to a scheduler and carries the runtime settings
//! (`actor_throughput`, `default_max_forks`) used by everything created
//! through it. Groups are cheap to clone; clones share the scheduler.
//!
//! A process-wide default group backed by a thread pool with one worker per
//! CPU is created on first use by [`default_group`].

use log::{debug, info};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;
use weft_core::config::DataflowConfig;
use weft_core::error::{BoxError, Error, Result};
use weft_core::traits::Scheduler;

use crate::actor::Actor;
use crate::agent::Agent;
use crate::channel::{ReadChannel, WriteChannel};
use crate::pool::{ThreadPool, ThreadPoolStats};
use crate::processor::{OutputContext, Processor, ProcessorBuilder};
use crate::select::Select;

/// A scheduler plus the settings for actors started on it
#[derive(Clone)]
pub struct ParallelGroup {
    scheduler: Arc<dyn Scheduler>,
    /// Set when the group owns its pool
    pool: Option<Arc<ThreadPool>>,
    config: DataflowConfig,
}

impl ParallelGroup {
    /// Create a group backed by a new pool of `threads` workers
    pub fn new(threads: usize) -> Result<Self> {
        let mut config = DataflowConfig::default();
        config.pool.max_threads = threads;
        Self::with_config(config)
    }

    /// Create a group backed by a new pool built from `config`
    pub fn with_config(config: DataflowConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(ThreadPool::with_config(config.pool.clone())?);
        info!(
            "Created parallel group with {} worker(s)",
            pool.worker_count()
        );
        Ok(Self {
            scheduler: pool.clone(),
            pool: Some(pool),
            config,
        })
    }

    /// Create a group that runs on a caller-supplied scheduler.
    ///
    /// `config.pool` is ignored; the caller owns the scheduler's lifetime.
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>, config: DataflowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scheduler,
            pool: None,
            config,
        })
    }

    /// The scheduler actors of this group run on
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// The group's runtime settings
    pub fn config(&self) -> &DataflowConfig {
        &self.config
    }

    /// Statistics of the group's own pool, if it has one
    pub fn pool_stats(&self) -> Option<ThreadPoolStats> {
        self.pool.as_ref().map(|pool| pool.get_stats())
    }

    /// Attach `actor` to this group's scheduler
    pub fn start<M: Send + 'static>(&self, actor: &Actor<M>) -> Result<()> {
        actor.start(self.scheduler())
    }

    /// Create and start an actor running `behavior` for every message
    pub fn actor<M, F>(&self, behavior: F) -> Result<Actor<M>>
    where
        M: Send + 'static,
        F: FnMut(&Actor<M>, M) + Send + 'static,
    {
        let actor = Actor::new(Box::new(behavior), self.config.actor_throughput);
        self.start(&actor)?;
        debug!("Started actor {}", actor.id());
        Ok(actor)
    }

    /// Start building an operator or selector in this group
    pub fn processor<I: Send + 'static, O: Send + 'static>(&self) -> ProcessorBuilder<I, O> {
        ProcessorBuilder::new(self)
    }

    /// Start a full-join operator over `inputs` and `outputs`
    pub fn operator<I, O, F>(
        &self,
        inputs: Vec<Arc<dyn ReadChannel<I>>>,
        outputs: Vec<Arc<dyn WriteChannel<O>>>,
        body: F,
    ) -> Result<Processor<I>>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(Vec<I>, &OutputContext<O>) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        let builder = inputs
            .into_iter()
            .fold(self.processor(), |builder, input| builder.shared_input(input));
        outputs
            .into_iter()
            .fold(builder, |builder, output| builder.shared_output(output))
            .operator(body)
    }

    /// Start a selector that forwards every value from any input to all
    /// `outputs`
    pub fn selector<T: Clone + Send + 'static>(
        &self,
        inputs: Vec<Arc<dyn ReadChannel<T>>>,
        outputs: Vec<Arc<dyn WriteChannel<T>>>,
    ) -> Result<Processor<T>> {
        let builder = inputs
            .into_iter()
            .fold(self.processor(), |builder, input| builder.shared_input(input));
        outputs
            .into_iter()
            .fold(builder, |builder, output| builder.shared_output(output))
            .selector(|_, value, ctx| {
                ctx.bind_all_outputs(value)?;
                Ok(())
            })
    }

    /// Create a [`Select`] over `inputs`
    pub fn select<T: Send + 'static>(&self, inputs: Vec<Arc<dyn ReadChannel<T>>>) -> Result<Select<T>> {
        Select::in_group(self, inputs)
    }

    /// Create an agent holding `initial`
    pub fn agent<T: Clone + Send + Sync + 'static>(&self, initial: T) -> Result<Agent<T>> {
        Agent::in_group(self, initial)
    }

    /// Stop the group's own pool from accepting work. Queued tasks still
    /// run. Has no effect on a caller-supplied scheduler.
    pub fn shutdown(&self) {
        match &self.pool {
            Some(pool) => pool.shutdown(),
            None => debug!("Parallel group runs on an external scheduler; nothing to shut down"),
        }
    }

    /// Shut down the group's own pool and wait for its workers to exit
    pub fn shutdown_and_join(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown_and_join();
        }
    }
}

impl fmt::Debug for ParallelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelGroup")
            .field("owns_pool", &self.pool.is_some())
            .field("config", &self.config)
            .finish()
    }
}

static DEFAULT_GROUP: Lazy<std::result::Result<ParallelGroup, String>> = Lazy::new(|| {
    ParallelGroup::with_config(DataflowConfig::default()).map_err(|e| e.to_string())
});

/// The process-wide default group, created on first use.
pub fn default_group() -> Result<&'static ParallelGroup> {
    DEFAULT_GROUP
        .as_ref()
        .map_err(|e| Error::Runtime(format!("default group unavailable: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use weft_core::error::ConfigurationError;
    use weft_core::traits::Task;

    #[test]
    fn test_default_group_is_shared() {
        let first = default_group().unwrap();
        let second = default_group().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(first.pool_stats().is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DataflowConfig::default();
        config.default_max_forks = 0;
        assert!(matches!(
            ParallelGroup::with_config(config),
            Err(Error::Configuration(ConfigurationError::InvalidMaxForks(0)))
        ));
    }

    #[test]
    fn test_actor_runs_on_group() {
        let group = ParallelGroup::new(2).unwrap();
        let total = Arc::new(AtomicUsize::new(0));

        let sum = total.clone();
        let actor = group
            .actor(move |me: &Actor<usize>, n| {
                sum.fetch_add(n, Ordering::SeqCst);
                if n == 0 {
                    me.stop();
                }
            })
            .unwrap();

        for n in [5, 10, 0] {
            actor.send(n).unwrap();
        }
        assert!(actor.join_timeout(Duration::from_secs(5)));
        assert_eq!(total.load(Ordering::SeqCst), 15);
    }

    struct CountingScheduler {
        inner: ThreadPool,
        scheduled: AtomicUsize,
    }

    impl Scheduler for CountingScheduler {
        fn schedule(&self, task: Task) -> Result<()> {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
            self.inner.schedule(task)
        }
    }

    #[test]
    fn test_external_scheduler() {
        let scheduler = Arc::new(CountingScheduler {
            inner: ThreadPool::new(1).unwrap(),
            scheduled: AtomicUsize::new(0),
        });
        let group =
            ParallelGroup::with_scheduler(scheduler.clone(), DataflowConfig::default()).unwrap();
        assert!(group.pool_stats().is_none());

        let input: Stream<u8> = Stream::new();
        let output: Stream<u8> = Stream::new();
        let forwarder = group
            .selector::<u8>(vec![Arc::new(input.clone())], vec![Arc::new(output.clone())])
            .unwrap();

        input.write(3);
        assert_eq!(output.read(), 3);
        assert!(scheduler.scheduled.load(Ordering::SeqCst) > 0);

        forwarder.terminate();
        group.shutdown();
    }

    #[test]
    fn test_shutdown_rejects_new_actors_work() {
        let group = ParallelGroup::new(1).unwrap();
        group.shutdown_and_join();

        let actor = group.actor(|_: &Actor<()>, _| {}).unwrap();
        // Scheduling the first turn fails, which stops the actor.
        let _ = actor.send(());
        assert!(actor.join_timeout(Duration::from_secs(1)));
    }
}
