//! Agents: a value whose updates are serialized through one actor.
//!
//! Clients submit update functions; the agent applies them one at a time,
//! in the order they were submitted. A failing update (error, panic or a
//! validator rejection) is reported and skipped, and the agent carries on
//! with the next one.

use log::{debug, error, trace};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use weft_core::error::{BodyError, BoxError, Error, Result};
use weft_core::id::ActorId;

use crate::actor::Actor;
use crate::group::{default_group, ParallelGroup};
use crate::oneshot;
use crate::processor::ErrorHandler;

type Update<T> = Box<dyn FnOnce(&mut T) -> std::result::Result<(), BoxError> + Send + 'static>;
type Inspect<T> = Box<dyn FnOnce(&T) + Send + 'static>;

/// Checks a proposed value against the current one before it is committed
pub type Validator<T> =
    Arc<dyn Fn(&T, &T) -> std::result::Result<(), String> + Send + Sync + 'static>;

/// Called with the old and the new value after every committed update
pub type Listener<T> = Arc<dyn Fn(&T, &T) + Send + Sync + 'static>;

enum AgentMessage<T> {
    Update(Update<T>),
    Inspect(Inspect<T>),
}

struct AgentState<T> {
    id: ActorId,
    value: RwLock<T>,
    handlers: RwLock<Vec<ErrorHandler>>,
    validators: RwLock<Vec<Validator<T>>>,
    listeners: RwLock<Vec<Listener<T>>>,
    /// Errors raised while no handler was registered
    errors: Mutex<Vec<BodyError>>,
}

impl<T: Clone + Send + Sync + 'static> AgentState<T> {
    fn handle(&self, message: AgentMessage<T>) {
        match message {
            AgentMessage::Update(update) => self.apply(update),
            AgentMessage::Inspect(inspect) => {
                let value = self.value.read();
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| inspect(&*value))) {
                    drop(value);
                    self.report(BodyError::from_panic(payload));
                }
            }
        }
    }

    fn apply(&self, update: Update<T>) {
        let mut proposed = self.value.read().clone();
        match catch_unwind(AssertUnwindSafe(|| update(&mut proposed))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.report(BodyError::Failed(e)),
            Err(payload) => return self.report(BodyError::from_panic(payload)),
        }

        let validators = self.validators.read().clone();
        for validator in validators {
            let current = self.value.read();
            let verdict = catch_unwind(AssertUnwindSafe(|| validator(&*current, &proposed)));
            drop(current);
            match verdict {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => return self.report(BodyError::Rejected(reason)),
                Err(payload) => return self.report(BodyError::from_panic(payload)),
            }
        }

        let listeners = self.listeners.read().clone();
        let old = std::mem::replace(&mut *self.value.write(), proposed);
        trace!("Agent {}: update committed", self.id);

        if listeners.is_empty() {
            return;
        }
        let new = self.value.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&old, &new))).is_err() {
                error!("Agent {}: listener panicked", self.id);
            }
        }
    }

    fn report(&self, error: BodyError) {
        let handlers = self.handlers.read().clone();
        if handlers.is_empty() {
            error!("Agent {}: {}", self.id, error);
            self.errors.lock().push(error);
            return;
        }
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err() {
                error!("Agent {}: error handler panicked", self.id);
            }
        }
    }
}

/// A thread-safe value updated by serialized update functions.
///
/// ```no_run
/// use weft_dataflow::Agent;
///
/// let counter = Agent::new(0u64).unwrap();
/// for _ in 0..10 {
///     counter.update(|n| n + 1).unwrap();
/// }
/// assert_eq!(counter.await_val().unwrap(), 10);
/// ```
pub struct Agent<T: Clone + Send + Sync + 'static> {
    actor: Actor<AgentMessage<T>>,
    state: Arc<AgentState<T>>,
}

impl<T: Clone + Send + Sync + 'static> Agent<T> {
    /// Create an agent in the default group
    pub fn new(initial: T) -> Result<Self> {
        Self::in_group(default_group()?, initial)
    }

    /// Create an agent in `group`
    pub fn in_group(group: &ParallelGroup, initial: T) -> Result<Self> {
        let id = ActorId::next();
        let state = Arc::new(AgentState {
            id,
            value: RwLock::new(initial),
            handlers: RwLock::new(Vec::new()),
            validators: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        });

        let behavior_state = Arc::clone(&state);
        let actor = Actor::with_id(
            id,
            Box::new(move |_: &Actor<AgentMessage<T>>, message| behavior_state.handle(message)),
            group.config().actor_throughput,
        );
        group.start(&actor)?;
        debug!("Agent {} started", id);

        Ok(Self { actor, state })
    }

    /// Submit a fallible in-place update
    pub fn send<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.actor.send(AgentMessage::Update(Box::new(update)))?;
        Ok(())
    }

    /// Submit an update that computes the new value from the current one
    pub fn update<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.send(move |value| {
            *value = update(value);
            Ok(())
        })
    }

    /// Submit an update that modifies the value in place
    pub fn mutate<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.send(move |value| {
            mutate(value);
            Ok(())
        })
    }

    /// Run `query` against the value once every update submitted before
    /// this call has been applied, and return its result.
    pub fn send_and_wait<R, F>(&self, query: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&T) -> R + Send + 'static,
    {
        let (sender, receiver) = oneshot::pair();
        self.actor.send(AgentMessage::Inspect(Box::new(move |value| {
            if sender.send(query(value)).is_err() {
                trace!("Agent reply dropped; caller went away");
            }
        })))?;
        receiver
            .recv()
            .ok_or_else(|| Error::Runtime(format!("agent {} stopped before replying", self.id())))
    }

    /// Block until every update submitted before this call has been applied
    pub fn await_updates(&self) -> Result<()> {
        self.send_and_wait(|_| ())
    }

    /// The value after every update submitted before this call
    pub fn await_val(&self) -> Result<T> {
        self.send_and_wait(T::clone)
    }

    /// An immediate snapshot of the value. Updates still queued are not
    /// reflected.
    pub fn val(&self) -> T {
        self.state.value.read().clone()
    }

    /// Call `callback` with the value once every update submitted before
    /// this call has been applied. Does not block.
    pub fn val_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.actor
            .send(AgentMessage::Inspect(Box::new(move |value| callback(value.clone()))))?;
        Ok(())
    }

    /// Register an error handler. While no handler is registered, errors
    /// are logged and kept for [`errors`](Self::errors).
    pub fn add_error_handler<F>(&self, handler: F)
    where
        F: Fn(&BodyError) + Send + Sync + 'static,
    {
        self.state.handlers.write().push(Arc::new(handler));
    }

    /// Register a validator called with `(current, proposed)` before every
    /// commit. Returning `Err` rejects the update.
    pub fn add_validator<F>(&self, validator: F)
    where
        F: Fn(&T, &T) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.state.validators.write().push(Arc::new(validator));
    }

    /// Register a listener called with `(old, new)` after every commit
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.state.listeners.write().push(Arc::new(listener));
    }

    /// Take the errors recorded while no handler was registered
    pub fn errors(&self) -> Vec<BodyError> {
        std::mem::take(&mut *self.state.errors.lock())
    }

    /// Stop the agent. Queued updates are dropped and later sends fail.
    pub fn stop(&self) {
        self.actor.stop();
    }

    /// Block until the agent has stopped
    pub fn join(&self) {
        self.actor.join();
    }

    /// Whether the agent has stopped
    pub fn is_stopped(&self) -> bool {
        self.actor.is_stopped()
    }

    /// The agent's identifier
    pub fn id(&self) -> ActorId {
        self.state.id
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Agent<T> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + Sync + fmt::Debug + 'static> fmt::Debug for Agent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.state.id)
            .field("value", &*self.state.value.read())
            .finish()
    }
}
