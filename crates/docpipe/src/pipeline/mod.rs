//! One pipeline step applied to one job: load, claim, run the stage's side
//! effect, record the outcome, announce the next stage.

pub mod error;
pub mod runner;
pub mod stage;
pub mod wiring;

pub use error::{PipelineError, StepError};
pub use runner::{Executor, StepExecutor, StepOutcome};
pub use stage::{Announcement, DownloadStage, ProcessStage, Stage};
pub use wiring::Pipelines;
