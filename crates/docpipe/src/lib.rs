pub mod config;
pub mod consumer;
pub mod db;
pub mod downloader;
pub mod error;
pub mod guard;
pub mod job;
pub mod observability;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod repository;
pub mod request;
pub mod retry;
pub mod sanitize;
pub mod storage;

pub use config::{load_config, load_config_from_str, BatchMode, PipelineConfig};
pub use consumer::{Ack, BatchConsumer, BatchOutcome, Delivery, OutcomeCode, SingleConsumer};
pub use db::{Database, SqliteJobRepository};
pub use error::{ConfigError, DocpipeError, ProcessError, Result};
pub use guard::FreshnessGuard;
pub use job::{Job, JobError, JobKind, JobStatus};
pub use pipeline::{DownloadStage, Executor, PipelineError, ProcessStage, StepExecutor, StepOutcome};
pub use repository::{JobRepository, MemoryJobRepository};
pub use request::InboundRequest;
pub use retry::RetryPolicy;
