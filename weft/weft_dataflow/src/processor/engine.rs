//! The actor behavior that drives an operator or selector.
//!
//! The engine keeps one slot per input. An empty slot has a reader
//! registered with its channel; the reader posts an `Arrived` message back
//! to the actor. The slot table is shared with the processor handle so that
//! stopping from outside can return every held value to its channel.
//! A firing takes values out of the slots and runs the body either inline
//! (`max_forks == 1`) or as a separate task on the scheduler.

use log::{debug, error, trace};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use weft_core::error::{BodyError, BoxError};
use weft_core::id::ActorId;
use weft_core::traits::Scheduler;

use super::context::OutputContext;
use crate::actor::Actor;
use crate::channel::{ReadChannel, Reader, Registration};

/// Callback invoked with every error raised inside an operator
pub type ErrorHandler = Arc<dyn Fn(&BodyError) + Send + Sync + 'static>;

/// Body of a full-join operator: one value per input, in input order.
pub type JoinBody<I, O> =
    Arc<dyn Fn(Vec<I>, &OutputContext<O>) -> Result<(), BoxError> + Send + Sync + 'static>;

/// Body of a selector: the index of the input that produced the value.
pub type SelectBody<I, O> =
    Arc<dyn Fn(usize, I, &OutputContext<O>) -> Result<(), BoxError> + Send + Sync + 'static>;

pub(crate) enum Body<I, O> {
    Join(JoinBody<I, O>),
    Select(SelectBody<I, O>),
}

impl<I, O> Clone for Body<I, O> {
    fn clone(&self) -> Self {
        match self {
            Self::Join(body) => Self::Join(Arc::clone(body)),
            Self::Select(body) => Self::Select(Arc::clone(body)),
        }
    }
}

enum Firing<I> {
    Join(Vec<I>),
    Select(usize, I),
}

/// Messages understood by a processor actor
pub(crate) enum ProcessorMessage<I> {
    /// Register the first round of readers
    Start,
    /// A value was delivered to the reader of input `index`
    Arrived { index: usize, value: I },
    /// Finish the work that is already available, then stop
    StopGently,
    /// A forked firing completed
    ForkDone,
}

/// State shared between the engine, its forks and the public handle
pub(crate) struct Shared<O> {
    pub(crate) id: ActorId,
    pub(crate) outputs: OutputContext<O>,
    pub(crate) handlers: RwLock<Vec<ErrorHandler>>,
}

impl<O> Shared<O> {
    /// Route `error` to the handlers, or to the log when there are none.
    pub(crate) fn report_error(&self, error: BodyError) {
        let handlers = self.handlers.read().clone();
        if handlers.is_empty() {
            error!("Operator {}: {}", self.id, error);
            return;
        }
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err() {
                error!("Operator {}: error handler panicked", self.id);
            }
        }
    }
}

struct InputSlot<I: Send + 'static> {
    channel: Arc<dyn ReadChannel<I>>,
    value: Option<I>,
    /// A reader is registered with the channel and has not delivered yet
    waiting: bool,
    /// A single-assignment input whose value has been used up
    exhausted: bool,
}

struct SlotTable<I: Send + 'static> {
    slots: Vec<InputSlot<I>>,
    /// Select mode: filled slots in arrival order
    ready: VecDeque<usize>,
    /// Set once the processor has stopped; values go straight back
    released: bool,
}

/// The input slots of one processor, shared by its engine and its handle.
pub(crate) struct Inputs<I: Send + 'static> {
    table: Mutex<SlotTable<I>>,
}

impl<I: Send + 'static> Inputs<I> {
    pub(crate) fn new(channels: Vec<Arc<dyn ReadChannel<I>>>) -> Self {
        Self {
            table: Mutex::new(SlotTable {
                slots: channels
                    .into_iter()
                    .map(|channel| InputSlot {
                        channel,
                        value: None,
                        waiting: false,
                        exhausted: false,
                    })
                    .collect(),
                ready: VecDeque::new(),
                released: false,
            }),
        }
    }

    /// Stop `actor` and return every value it still holds to the channel it
    /// came from: values parked in slots and arrivals left in the mailbox.
    pub(crate) fn shut_down(&self, actor: &Actor<ProcessorMessage<I>>) {
        let discarded = actor.stop_and_drain();
        let mut returned = Vec::new();
        {
            let mut table = self.table.lock();
            table.released = true;
            table.ready.clear();
            for slot in &mut table.slots {
                if let Some(value) = slot.value.take() {
                    returned.push((Arc::clone(&slot.channel), value));
                }
            }
            for message in discarded {
                if let ProcessorMessage::Arrived { index, value } = message {
                    if let Some(slot) = table.slots.get(index) {
                        returned.push((Arc::clone(&slot.channel), value));
                    }
                }
            }
        }

        if !returned.is_empty() {
            debug!("Operator {}: returning {} unused value(s)", actor.id(), returned.len());
        }
        // Values go back to the head of their channel, so the oldest goes last.
        for (channel, value) in returned.into_iter().rev() {
            channel.give_back(value);
        }
    }

    fn all_exhausted(&self) -> bool {
        self.table.lock().slots.iter().all(|slot| slot.exhausted)
    }
}

pub(crate) struct Engine<I: Send + 'static, O> {
    inputs: Arc<Inputs<I>>,
    body: Body<I, O>,
    shared: Arc<Shared<O>>,
    scheduler: Arc<dyn Scheduler>,
    max_forks: usize,
    active_forks: usize,
    draining: bool,
}

impl<I: Send + 'static, O: Send + 'static> Engine<I, O> {
    pub(crate) fn new(
        inputs: Arc<Inputs<I>>,
        body: Body<I, O>,
        shared: Arc<Shared<O>>,
        scheduler: Arc<dyn Scheduler>,
        max_forks: usize,
    ) -> Self {
        Self {
            inputs,
            body,
            shared,
            scheduler,
            max_forks,
            active_forks: 0,
            draining: false,
        }
    }

    /// Actor behavior entry point
    pub(crate) fn handle(
        &mut self,
        actor: &Actor<ProcessorMessage<I>>,
        message: ProcessorMessage<I>,
    ) {
        match message {
            ProcessorMessage::Start => {
                debug!("Operator {}: started", self.shared.id);
            }
            ProcessorMessage::Arrived { index, value } => {
                trace!("Operator {}: value arrived on input {}", self.shared.id, index);
                self.accept(index, value);
            }
            ProcessorMessage::StopGently => {
                debug!("Operator {}: stopping after available work", self.shared.id);
                self.draining = true;
            }
            ProcessorMessage::ForkDone => {
                self.active_forks = self.active_forks.saturating_sub(1);
            }
        }

        self.pump(actor);

        if !actor.is_stopped()
            && self.active_forks == 0
            && (self.draining || self.inputs.all_exhausted())
        {
            debug!("Operator {}: no further firings, stopping", self.shared.id);
            self.inputs.shut_down(actor);
        }
    }

    fn is_select(&self) -> bool {
        matches!(self.body, Body::Select(_))
    }

    fn accept(&self, index: usize, value: I) {
        let is_select = self.is_select();
        let declined = {
            let mut guard = self.inputs.table.lock();
            let table = &mut *guard;
            let Some(slot) = table.slots.get_mut(index) else {
                return;
            };
            slot.waiting = false;
            if table.released || slot.value.is_some() {
                Some((Arc::clone(&slot.channel), value))
            } else {
                slot.value = Some(value);
                if is_select {
                    table.ready.push_back(index);
                }
                None
            }
        };

        if let Some((channel, value)) = declined {
            channel.give_back(value);
        }
    }

    fn pump(&mut self, actor: &Actor<ProcessorMessage<I>>) {
        loop {
            if actor.is_stopped() {
                return;
            }
            self.fill(actor);
            if self.active_forks >= self.max_forks {
                return;
            }
            let Some(firing) = self.next_firing() else {
                return;
            };
            self.dispatch(actor, firing);
        }
    }

    /// Request a value for every empty slot.
    ///
    /// While draining only values that are already available are taken;
    /// no new readers are registered.
    fn fill(&self, actor: &Actor<ProcessorMessage<I>>) {
        let is_select = self.is_select();
        let mut guard = self.inputs.table.lock();
        let table = &mut *guard;
        if table.released {
            return;
        }

        for index in 0..table.slots.len() {
            let slot = &mut table.slots[index];
            if slot.value.is_some() || slot.waiting || slot.exhausted {
                continue;
            }

            if self.draining {
                if let Some(value) = slot.channel.try_read() {
                    slot.value = Some(value);
                    if is_select {
                        table.ready.push_back(index);
                    }
                }
                continue;
            }

            let target = actor.clone();
            let reader = Reader::new(move |value: I| {
                target
                    .deliver(ProcessorMessage::Arrived { index, value })
                    .or_else(|rejected| match rejected {
                        ProcessorMessage::Arrived { value, .. } => Err(value),
                        _ => Ok(()),
                    })
            });

            match slot.channel.register(reader) {
                Registration::Ready(value, _) => {
                    slot.value = Some(value);
                    if is_select {
                        table.ready.push_back(index);
                    }
                }
                Registration::Queued => slot.waiting = true,
            }
        }
    }

    fn next_firing(&self) -> Option<Firing<I>> {
        let mut guard = self.inputs.table.lock();
        let table = &mut *guard;
        if table.released {
            return None;
        }

        match self.body {
            Body::Join(_) => {
                if table.slots.iter().any(|slot| slot.value.is_none()) {
                    return None;
                }
                let single = table
                    .slots
                    .iter()
                    .all(|slot| slot.channel.is_single_assignment());
                let values = table
                    .slots
                    .iter_mut()
                    .filter_map(|slot| {
                        slot.exhausted = single;
                        slot.value.take()
                    })
                    .collect();
                Some(Firing::Join(values))
            }
            Body::Select(_) => {
                while let Some(index) = table.ready.pop_front() {
                    let slot = &mut table.slots[index];
                    if let Some(value) = slot.value.take() {
                        slot.exhausted = slot.channel.is_single_assignment();
                        return Some(Firing::Select(index, value));
                    }
                }
                None
            }
        }
    }

    fn dispatch(&mut self, actor: &Actor<ProcessorMessage<I>>, firing: Firing<I>) {
        if self.max_forks == 1 {
            if let Err(error) = run_body(&self.body, firing, &self.shared.outputs) {
                self.shared.report_error(error);
                self.inputs.shut_down(actor);
            }
            return;
        }

        let body = self.body.clone();
        let shared = Arc::clone(&self.shared);
        let inputs = Arc::clone(&self.inputs);
        let target = actor.clone();
        let fork = Box::new(move || {
            if let Err(error) = run_body(&body, firing, &shared.outputs) {
                shared.report_error(error);
                inputs.shut_down(&target);
            }
            if target.deliver(ProcessorMessage::ForkDone).is_err() {
                trace!("Operator {}: fork finished after stop", shared.id);
            }
        });

        self.active_forks += 1;
        if let Err(e) = self.scheduler.schedule(fork) {
            self.active_forks -= 1;
            self.shared.report_error(BodyError::Failed(Box::new(e)));
            self.inputs.shut_down(actor);
        }
    }
}

fn run_body<I, O: Send + 'static>(
    body: &Body<I, O>,
    firing: Firing<I>,
    outputs: &OutputContext<O>,
) -> Result<(), BodyError> {
    let result = catch_unwind(AssertUnwindSafe(|| match (body, firing) {
        (Body::Join(body), Firing::Join(values)) => body(values, outputs),
        (Body::Select(body), Firing::Select(index, value)) => body(index, value, outputs),
        _ => Ok(()),
    }));

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BodyError::Failed(e)),
        Err(payload) => Err(BodyError::from_panic(payload)),
    }
}
