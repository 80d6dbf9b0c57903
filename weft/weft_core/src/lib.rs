//! # Weft Core
//!
//! `weft_core` holds the pieces shared by every weft crate: the error
//! hierarchy, runtime configuration, actor identifiers and the
//! [`Scheduler`] trait through which the dataflow engine hands work to a
//! worker pool.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for channels, configuration and user code
//! - **config**: Serde-backed runtime and thread pool configuration
//! - **id**: Process-local actor identifiers
//! - **traits**: The worker pool boundary

pub mod config;
pub mod error;
pub mod id;
pub mod traits;

pub use config::{DataflowConfig, ThreadPoolConfig};
pub use error::{BodyError, BoxError, ChannelError, ConfigurationError, Error, Result};
pub use id::ActorId;
pub use traits::{Scheduler, Task};
