//! Scheduling kernel: submission validation, the atomic claim/complete/fail
//! transitions, the worker that runs one task, and the control loop that
//! ties them together.
//!
//! Nothing outside [`taskgraph_db`] touches the task/dependency tables
//! directly -- this crate is the only caller of its query functions.

pub mod error;
pub mod scheduler;
pub mod submit;
pub mod worker;

pub use error::KernelError;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use submit::NewTask;
