//! Dataflow operators and selectors.
//!
//! A processor reads a fixed list of input channels and publishes to a
//! fixed list of output channels through an [`OutputContext`]. Two firing
//! rules are supported:
//!
//! - **Operator** (full join): fires once a value is available on every
//!   input, with the values in input order
//! - **Selector**: fires for every value on any input, in arrival order
//!
//! Each processor runs on one actor. With `max_forks == 1` firings are
//! sequential; with more, up to `max_forks` firings run concurrently as
//! separate scheduler tasks.

pub mod context;
mod engine;

pub use context::OutputContext;
pub use engine::{ErrorHandler, JoinBody, SelectBody};

use log::{debug, trace};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use weft_core::error::{BodyError, BoxError, ConfigurationError, Result};
use weft_core::id::ActorId;

use crate::actor::Actor;
use crate::channel::{ReadChannel, WriteChannel};
use crate::group::ParallelGroup;
use engine::{Body, Engine, Inputs, ProcessorMessage, Shared};

/// Builder for operators and selectors.
///
/// ```no_run
/// use weft_dataflow::channel::{ReadChannel, Stream};
/// use weft_dataflow::{ParallelGroup, ProcessorBuilder};
///
/// let group = ParallelGroup::new(2).unwrap();
/// let (a, b, sums) = (Stream::new(), Stream::new(), Stream::new());
///
/// let adder = ProcessorBuilder::new(&group)
///     .input(a.clone())
///     .input(b.clone())
///     .output(sums.clone())
///     .operator(|values: Vec<i32>, out| {
///         out.bind_output(values.iter().sum::<i32>())?;
///         Ok(())
///     })
///     .unwrap();
///
/// a.write(1);
/// b.write(10);
/// assert_eq!(sums.read(), 11);
/// adder.terminate();
/// ```
pub struct ProcessorBuilder<I: Send + 'static, O> {
    group: ParallelGroup,
    inputs: Vec<Arc<dyn ReadChannel<I>>>,
    outputs: Vec<Arc<dyn WriteChannel<O>>>,
    max_forks: Option<usize>,
    handlers: Vec<ErrorHandler>,
}

impl<I: Send + 'static, O: Send + 'static> ProcessorBuilder<I, O> {
    /// Start building a processor that will run in `group`
    pub fn new(group: &ParallelGroup) -> Self {
        Self {
            group: group.clone(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            max_forks: None,
            handlers: Vec::new(),
        }
    }

    /// Append an input channel
    pub fn input<C: ReadChannel<I> + 'static>(self, channel: C) -> Self {
        self.shared_input(Arc::new(channel))
    }

    /// Append an input channel that is already shared
    pub fn shared_input(mut self, channel: Arc<dyn ReadChannel<I>>) -> Self {
        self.inputs.push(channel);
        self
    }

    /// Append an output channel
    pub fn output<C: WriteChannel<O> + 'static>(self, channel: C) -> Self {
        self.shared_output(Arc::new(channel))
    }

    /// Append an output channel that is already shared
    pub fn shared_output(mut self, channel: Arc<dyn WriteChannel<O>>) -> Self {
        self.outputs.push(channel);
        self
    }

    /// Allow up to `max_forks` firings to run concurrently
    pub fn max_forks(mut self, max_forks: usize) -> Self {
        self.max_forks = Some(max_forks);
        self
    }

    /// Register an error handler before the processor starts
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BodyError) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Build and start a full-join operator.
    pub fn operator<F>(self, body: F) -> Result<Processor<I>>
    where
        F: Fn(Vec<I>, &OutputContext<O>) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.spawn(Body::Join(Arc::new(body)))
    }

    /// Build and start a selector.
    pub fn selector<F>(self, body: F) -> Result<Processor<I>>
    where
        F: Fn(usize, I, &OutputContext<O>) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.spawn(Body::Select(Arc::new(body)))
    }

    fn spawn(self, body: Body<I, O>) -> Result<Processor<I>> {
        if self.inputs.is_empty() {
            return Err(ConfigurationError::NoInputs.into());
        }
        let max_forks = self
            .max_forks
            .unwrap_or(self.group.config().default_max_forks);
        if max_forks == 0 {
            return Err(ConfigurationError::InvalidMaxForks(max_forks).into());
        }

        let id = ActorId::next();
        let shared = Arc::new(Shared {
            id,
            outputs: OutputContext::new(self.outputs),
            handlers: RwLock::new(self.handlers),
        });
        let inputs = Arc::new(Inputs::new(self.inputs));
        let mut engine = Engine::new(
            Arc::clone(&inputs),
            body,
            Arc::clone(&shared),
            self.group.scheduler(),
            max_forks,
        );

        let actor = Actor::with_id(
            id,
            Box::new(move |actor: &Actor<ProcessorMessage<I>>, message| {
                engine.handle(actor, message)
            }),
            self.group.config().actor_throughput,
        );
        actor.send(ProcessorMessage::Start)?;
        self.group.start(&actor)?;

        debug!("Processor {} running (max_forks = {})", id, max_forks);
        Ok(Processor {
            actor,
            shared,
            inputs,
        })
    }
}

/// Handle to a running operator or selector
pub struct Processor<I: Send + 'static> {
    actor: Actor<ProcessorMessage<I>>,
    shared: Arc<dyn HandlerRegistry>,
    inputs: Arc<Inputs<I>>,
}

/// Type-erased access to a processor's error handlers
trait HandlerRegistry: Send + Sync {
    fn id(&self) -> ActorId;
    fn add(&self, handler: ErrorHandler);
}

impl<O: Send + 'static> HandlerRegistry for Shared<O> {
    fn id(&self) -> ActorId {
        self.id
    }

    fn add(&self, handler: ErrorHandler) {
        self.handlers.write().push(handler);
    }
}

impl<I: Send + 'static> Processor<I> {
    /// The processor's identifier
    pub fn id(&self) -> ActorId {
        self.shared.id()
    }

    /// Register another error handler on a running processor
    pub fn add_error_handler<F>(&self, handler: F)
    where
        F: Fn(&BodyError) + Send + Sync + 'static,
    {
        self.shared.add(Arc::new(handler));
    }

    /// Stop immediately. Firings already running are not interrupted.
    /// Values the processor took but never fired go back to their input
    /// channels.
    pub fn terminate(&self) {
        debug!("Processor {}: terminate requested", self.id());
        self.inputs.shut_down(&self.actor);
    }

    /// Fire for every value already available, then stop.
    pub fn terminate_after_next_run(&self) {
        if self.actor.send(ProcessorMessage::StopGently).is_err() {
            trace!("Processor {}: already stopped", self.id());
        }
    }

    /// Block until the processor has stopped
    pub fn join(&self) {
        self.actor.join();
    }

    /// Block until the processor has stopped or `timeout` elapses.
    ///
    /// Returns `true` if it stopped.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        self.actor.join_timeout(timeout)
    }

    /// Whether the processor has stopped
    pub fn is_terminated(&self) -> bool {
        self.actor.is_stopped()
    }
}

impl<I: Send + 'static> Clone for Processor<I> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            shared: Arc::clone(&self.shared),
            inputs: Arc::clone(&self.inputs),
        }
    }
}

impl<I: Send + 'static> fmt::Debug for Processor<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("id", &self.id())
            .field("actor", &self.actor)
            .finish()
    }
}
