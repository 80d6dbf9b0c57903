//! Actor mailbox implementation.
//!
//! A mailbox is an unbounded FIFO of messages owned by one actor. Closing
//! it is atomic with respect to senders: once closed, every send fails and
//! hands the message back to the sender.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use weft_core::error::Error;
use weft_core::id::ActorId;

/// Error when sending a message to a mailbox
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// The actor has stopped and no longer accepts messages
    #[error("mailbox is closed")]
    Closed,
}

impl From<MailboxError> for Error {
    fn from(error: MailboxError) -> Self {
        Error::Runtime(error.to_string())
    }
}

struct MailboxState<M> {
    messages: VecDeque<M>,
    closed: bool,
}

/// An actor's unbounded message queue
pub struct Mailbox<M> {
    state: Mutex<MailboxState<M>>,
    // Actor identifier for debugging and monitoring
    actor_id: ActorId,
}

impl<M> Mailbox<M> {
    /// Create an empty, open mailbox
    pub fn new(actor_id: ActorId) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                messages: VecDeque::new(),
                closed: false,
            }),
            actor_id,
        }
    }

    /// Append a message; returns it back if the mailbox is closed
    pub fn push(&self, message: M) -> Result<(), M> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(message);
        }
        state.messages.push_back(message);
        Ok(())
    }

    /// Remove the oldest message
    pub fn pop(&self) -> Option<M> {
        self.state.lock().messages.pop_front()
    }

    /// Close the mailbox and return every message that was still queued
    pub fn close(&self) -> Vec<M> {
        let mut state = self.state.lock();
        state.closed = true;
        state.messages.drain(..).collect()
    }

    /// Whether the mailbox has been closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Whether no messages are queued
    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    /// Get the actor ID associated with this mailbox
    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }
}

impl<M> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mailbox")
            .field("actor_id", &self.actor_id)
            .field("queued", &state.messages.len())
            .field("closed", &state.closed)
            .finish()
    }
}
