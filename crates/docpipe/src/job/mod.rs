//! Job entities and their lifecycle state machine.

pub mod entity;
pub mod error;

pub use entity::{
    DownloadOutput, Job, JobKind, JobOutput, JobRecord, JobStatus, ProcessOutput,
    DEFAULT_MAX_ATTEMPTS,
};
pub use error::JobError;
