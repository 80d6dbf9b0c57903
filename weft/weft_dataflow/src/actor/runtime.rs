//! Actor execution over a shared scheduler.
//!
//! An actor is a mailbox plus a behavior. Whenever the mailbox is non-empty
//! and the actor is not already running, one turn is submitted to the
//! scheduler. A turn processes up to `throughput` messages in arrival order
//! and then yields its worker; if messages remain it reschedules itself.
//! The `scheduled` flag guarantees that at most one turn exists at a time,
//! so the behavior never runs on two workers at once.

use log::{debug, error, trace};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_core::error::{BodyError, Error, Result};
use weft_core::id::ActorId;
use weft_core::traits::Scheduler;

use super::mailbox::{Mailbox, MailboxError};

/// The function an actor runs for every message.
pub type Behavior<M> = Box<dyn FnMut(&Actor<M>, M) + Send + 'static>;

/// Lifecycle state of an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorStatus {
    /// Created but not yet attached to a scheduler
    Created,
    /// Attached to a scheduler and processing messages
    Running,
    /// Stopped normally
    Stopped,
    /// Stopped because the behavior panicked
    Crashed,
}

impl ActorStatus {
    /// Whether the actor has reached a final state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }
}

struct ActorCell<M: Send + 'static> {
    id: ActorId,
    mailbox: Mailbox<M>,
    behavior: Mutex<Behavior<M>>,
    status: Mutex<ActorStatus>,
    terminated: Condvar,
    scheduled: AtomicBool,
    scheduler: OnceCell<Arc<dyn Scheduler>>,
    throughput: usize,
}

/// A handle to an actor. Cloning the handle does not clone the actor.
pub struct Actor<M: Send + 'static> {
    cell: Arc<ActorCell<M>>,
}

impl<M: Send + 'static> Actor<M> {
    /// Create an idle actor. Messages sent before [`start`](Self::start)
    /// are queued.
    pub fn new(behavior: Behavior<M>, throughput: usize) -> Self {
        Self::with_id(ActorId::next(), behavior, throughput)
    }

    /// Create an idle actor under an identifier allocated by the caller.
    pub(crate) fn with_id(id: ActorId, behavior: Behavior<M>, throughput: usize) -> Self {
        Self {
            cell: Arc::new(ActorCell {
                id,
                mailbox: Mailbox::new(id),
                behavior: Mutex::new(behavior),
                status: Mutex::new(ActorStatus::Created),
                terminated: Condvar::new(),
                scheduled: AtomicBool::new(false),
                scheduler: OnceCell::new(),
                throughput: throughput.max(1),
            }),
        }
    }

    /// Attach the actor to a scheduler and begin processing messages.
    pub fn start(&self, scheduler: Arc<dyn Scheduler>) -> Result<()> {
        {
            let mut status = self.cell.status.lock();
            if *status != ActorStatus::Created {
                return Err(Error::Runtime(format!(
                    "{} cannot start from state {:?}",
                    self.cell.id, *status
                )));
            }
            if self.cell.scheduler.set(scheduler).is_err() {
                return Err(Error::Runtime(format!("{} already started", self.cell.id)));
            }
            *status = ActorStatus::Running;
        }

        debug!("Actor {} started", self.cell.id);
        self.schedule_if_idle();
        Ok(())
    }

    /// Enqueue a message. Never blocks.
    ///
    /// Fails with [`MailboxError::Closed`] once the actor has stopped.
    pub fn send(&self, message: M) -> std::result::Result<(), MailboxError> {
        self.deliver(message).map_err(|_| MailboxError::Closed)
    }

    /// Enqueue a message, handing it back if the actor has stopped.
    pub(crate) fn deliver(&self, message: M) -> std::result::Result<(), M> {
        self.cell.mailbox.push(message)?;
        self.schedule_if_idle();
        Ok(())
    }

    /// Stop the actor. A message being processed completes; every queued
    /// message is dropped and later sends fail.
    pub fn stop(&self) {
        drop(self.finish(ActorStatus::Stopped));
    }

    /// Stop the actor and hand back the messages that were still queued.
    /// Empty if the actor had already stopped.
    pub(crate) fn stop_and_drain(&self) -> Vec<M> {
        self.finish(ActorStatus::Stopped)
    }

    /// Block until the actor has stopped.
    pub fn join(&self) {
        let mut status = self.cell.status.lock();
        while !status.is_terminal() {
            self.cell.terminated.wait(&mut status);
        }
    }

    /// Block until the actor has stopped or `timeout` elapses.
    ///
    /// Returns `true` if the actor stopped.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.cell.status.lock();
        while !status.is_terminal() {
            if self
                .cell
                .terminated
                .wait_until(&mut status, deadline)
                .timed_out()
            {
                return status.is_terminal();
            }
        }
        true
    }

    /// Current lifecycle state
    pub fn status(&self) -> ActorStatus {
        *self.cell.status.lock()
    }

    /// Whether the actor has stopped (normally or by crashing)
    pub fn is_stopped(&self) -> bool {
        self.status().is_terminal()
    }

    /// The actor's identifier
    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    /// Number of messages waiting in the mailbox
    pub fn pending_messages(&self) -> usize {
        self.cell.mailbox.len()
    }

    /// The scheduler the actor runs on, once started
    pub fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
        self.cell.scheduler.get().cloned()
    }

    fn finish(&self, final_status: ActorStatus) -> Vec<M> {
        {
            let mut status = self.cell.status.lock();
            if status.is_terminal() {
                return Vec::new();
            }
            *status = final_status;
        }

        let discarded = self.cell.mailbox.close();
        debug!(
            "Actor {} {:?}, {} queued message(s) left",
            self.cell.id,
            final_status,
            discarded.len()
        );
        self.cell.terminated.notify_all();
        discarded
    }

    fn schedule_if_idle(&self) {
        let Some(scheduler) = self.cell.scheduler.get() else {
            return;
        };
        if self.cell.mailbox.is_empty() || self.is_stopped() {
            return;
        }
        if self
            .cell
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let actor = self.clone();
        if let Err(e) = scheduler.schedule(Box::new(move || actor.run_turn())) {
            self.cell.scheduled.store(false, Ordering::Release);
            error!("Actor {}: failed to schedule turn: {}", self.cell.id, e);
            drop(self.finish(ActorStatus::Crashed));
        }
    }

    fn run_turn(self) {
        trace!("Actor {}: turn started", self.cell.id);
        {
            let mut behavior = self.cell.behavior.lock();
            for _ in 0..self.cell.throughput {
                if self.is_stopped() {
                    break;
                }
                let Some(message) = self.cell.mailbox.pop() else {
                    break;
                };

                let result = catch_unwind(AssertUnwindSafe(|| (&mut **behavior)(&self, message)));
                if let Err(payload) = result {
                    error!(
                        "Actor {}: behavior {}",
                        self.cell.id,
                        BodyError::from_panic(payload)
                    );
                    drop(self.finish(ActorStatus::Crashed));
                    break;
                }
            }
        }

        self.cell.scheduled.store(false, Ordering::Release);
        // A sender may have found `scheduled` still set; pick its message up.
        self.schedule_if_idle();
    }
}

impl<M: Send + 'static> Clone for Actor<M> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<M: Send + 'static> fmt::Debug for Actor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.cell.id)
            .field("status", &self.status())
            .field("mailbox", &self.cell.mailbox)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ThreadPool;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pool(threads: usize) -> Arc<dyn Scheduler> {
        Arc::new(ThreadPool::new(threads).unwrap())
    }

    #[test]
    fn test_messages_processed_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let actor = Actor::new(
            Box::new(move |_: &Actor<u32>, message| seen_clone.lock().push(message)),
            4,
        );
        actor.start(pool(4)).unwrap();

        for i in 0..500 {
            actor.send(i).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 500 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*seen.lock(), (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_behavior_never_runs_concurrently() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let (a, o, p) = (active.clone(), overlaps.clone(), processed.clone());
        let actor = Actor::new(
            Box::new(move |_: &Actor<()>, _| {
                if a.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(50));
                a.fetch_sub(1, Ordering::SeqCst);
                p.fetch_add(1, Ordering::SeqCst);
            }),
            2,
        );
        actor.start(pool(8)).unwrap();

        let senders: Vec<_> = (0..4)
            .map(|_| {
                let actor = actor.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        actor.send(()).unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while processed.load(Ordering::SeqCst) < 200 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(processed.load(Ordering::SeqCst), 200);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_messages_before_start_are_queued() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let actor = Actor::new(
            Box::new(move |_: &Actor<u8>, _| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
            8,
        );

        actor.send(1).unwrap();
        actor.send(2).unwrap();
        assert_eq!(actor.status(), ActorStatus::Created);
        assert_eq!(actor.pending_messages(), 2);

        actor.start(pool(1)).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        assert!(actor.start(pool(1)).is_err());
    }

    #[test]
    fn test_stop_from_behavior_drops_rest_and_rejects_sends() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let actor = Actor::new(
            Box::new(move |me: &Actor<u32>, message| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                if message == 2 {
                    me.stop();
                }
            }),
            16,
        );

        for i in 0..10 {
            actor.send(i).unwrap();
        }
        actor.start(pool(2)).unwrap();
        actor.join();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(actor.status(), ActorStatus::Stopped);
        assert_eq!(actor.send(99), Err(MailboxError::Closed));
        assert_eq!(actor.pending_messages(), 0);
    }

    #[test]
    fn test_stop_and_drain_returns_queued_messages() {
        let actor = Actor::new(Box::new(|_: &Actor<u32>, _| {}), 1);
        for i in 0..3 {
            actor.send(i).unwrap();
        }

        assert_eq!(actor.stop_and_drain(), vec![0, 1, 2]);
        assert!(actor.stop_and_drain().is_empty());
        assert_eq!(actor.status(), ActorStatus::Stopped);
        assert_eq!(actor.deliver(3), Err(3));
    }

    #[test]
    fn test_join_timeout() {
        let actor = Actor::new(Box::new(|_: &Actor<()>, _| {}), 1);
        actor.start(pool(1)).unwrap();
        assert!(!actor.join_timeout(Duration::from_millis(20)));

        let stopper = actor.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });
        assert!(actor.join_timeout(Duration::from_secs(5)));
        assert!(actor.is_stopped());
    }

    #[test]
    fn test_panicking_behavior_crashes_actor() {
        let actor = Actor::new(
            Box::new(|_: &Actor<bool>, explode| {
                if explode {
                    panic!("behavior exploded");
                }
            }),
            4,
        );
        actor.start(pool(1)).unwrap();
        actor.send(false).unwrap();
        actor.send(true).unwrap();

        assert!(actor.join_timeout(Duration::from_secs(5)));
        assert_eq!(actor.status(), ActorStatus::Crashed);
    }
}
