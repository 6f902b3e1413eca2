//! The remote half of a VIP run
//!
//! - [`compiler`] turns a [`JobDescriptor`] into a batch `Job`
//! - [`observer`] follows the submitted job to a terminal state
//! - [`cleanup`] removes the run's ephemeral resources

#![deny(missing_docs)]

pub mod cleanup;
pub mod compiler;
pub mod observer;

pub use cleanup::{cleanup, CLEANUP_TIMEOUT};
pub use compiler::{compile_job, JobDescriptor, JobSettings};
pub use observer::{observe_job, ObserverSettings};
