//! Worker pools.
//!
//! The thread pool here is the stock [`Scheduler`](weft_core::Scheduler)
//! that parallel groups run their actors on. Any other implementation of
//! the trait can be plugged in instead.

pub mod thread;

pub use thread::{ThreadPool, ThreadPoolError, ThreadPoolStats};
