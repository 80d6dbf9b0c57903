//! Core traits shared between weft crates.

pub mod scheduler;

pub use scheduler::{Scheduler, Task};
