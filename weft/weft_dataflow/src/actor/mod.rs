//! Actor runtime.
//!
//! This module provides the execution model every dataflow component is
//! built on:
//!
//! - Unbounded FIFO mailboxes that reject messages once closed
//! - Actors multiplexed over a shared [`Scheduler`](weft_core::Scheduler),
//!   running one message at a time in arrival order

pub mod mailbox;
pub mod runtime;

pub use mailbox::{Mailbox, MailboxError};
pub use runtime::{Actor, ActorStatus, Behavior};
