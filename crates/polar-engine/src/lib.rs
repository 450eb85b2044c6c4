//! Polar engine crate.
//!
//! Runs one compute kernel over a `width x height` surface on a GPU, reads
//! the float RGBA result back and turns it into an 8-bit image.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod readback;
pub mod resource;

pub use config::JobConfig;
pub use error::{ErrorKind, JobError, Result};
pub use job::{run, run_to_file, JobReport, ReadbackPath};
