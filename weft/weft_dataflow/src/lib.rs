#![deny(warnings)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Weft Dataflow
//!
//! Dataflow concurrency on top of a small actor runtime.
//!
//! This crate provides:
//!
//! - Dataflow channels: single-assignment [`Variable`]s and FIFO [`Stream`]s
//! - Actors multiplexed over a shared worker pool
//! - Operators (full join) and selectors (first arrival) over channels
//! - [`Select`] for blocking selection across several channels
//! - [`Agent`]s: values updated by serialized update functions
//!
//! Everything runs in a [`ParallelGroup`], which binds actors to a
//! [`Scheduler`](weft_core::Scheduler). Blocking calls park the calling
//! thread; they never occupy a pool worker while waiting.
//!
//! ```no_run
//! use weft_dataflow::channel::{ReadChannel, Stream};
//! use weft_dataflow::ParallelGroup;
//!
//! let group = ParallelGroup::new(4).unwrap();
//! let (left, right, sums) = (Stream::new(), Stream::new(), Stream::new());
//!
//! let adder = group
//!     .processor()
//!     .input(left.clone())
//!     .input(right.clone())
//!     .output(sums.clone())
//!     .operator(|values: Vec<i32>, out| {
//!         out.bind_output(values[0] + values[1])?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! for (a, b) in [(1, 10), (2, 20), (3, 30)] {
//!     left.write(a);
//!     right.write(b);
//! }
//! adder.terminate_after_next_run();
//! adder.join();
//!
//! assert_eq!((0..3).map(|_| sums.read()).collect::<Vec<_>>(), vec![11, 22, 33]);
//! ```

/// Actor runtime: mailboxes and actors over a scheduler
pub mod actor;

/// Agents holding values updated through an actor
pub mod agent;

/// Dataflow variables and streams
pub mod channel;

/// Parallel groups and the process-wide default group
pub mod group;

/// Worker thread pool
pub mod pool;

/// Operators and selectors
pub mod processor;

/// Blocking selection over several channels
pub mod select;

mod oneshot;

// Re-export key types for easier access
pub use actor::{Actor, ActorStatus, MailboxError};
pub use agent::Agent;
pub use channel::{ReadChannel, Stream, Variable, WriteChannel};
pub use group::{default_group, ParallelGroup};
pub use pool::ThreadPool;
pub use processor::{OutputContext, Processor, ProcessorBuilder};
pub use select::{Select, SelectResult};
