//! Scheduler trait definition.
//!
//! The dataflow engine never creates threads on its own. Every actor turn
//! and every forked operator firing is handed to a `Scheduler`, which is
//! the boundary to whatever worker pool the application supplies.

use crate::error::Result;

/// A unit of work submitted to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Core trait for the worker pool collaborator.
///
/// Implementations must run submitted tasks eventually, in roughly FIFO
/// order, and must be able to run tasks from many actors concurrently.
/// The engine does not inspect pool size or implementation.
///
/// # Examples
///
/// ```
/// use weft_core::error::Result;
/// use weft_core::traits::{Scheduler, Task};
///
/// struct SpawnScheduler;
///
/// impl Scheduler for SpawnScheduler {
///     fn schedule(&self, task: Task) -> Result<()> {
///         std::thread::spawn(task);
///         Ok(())
///     }
/// }
///
/// let scheduler = SpawnScheduler;
/// scheduler.schedule(Box::new(|| println!("hello"))).unwrap();
/// ```
pub trait Scheduler: Send + Sync {
    /// Submit a task for execution.
    ///
    /// Returns immediately; the task runs asynchronously.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the task was accepted.
    /// * `Err(Error::Runtime)` if the scheduler is shutting down.
    fn schedule(&self, task: Task) -> Result<()>;
}
