pub mod backup;
pub mod build;
pub mod image;
pub mod ports;
pub mod repositories;
pub mod snapshot;
pub mod task;
pub mod worker;

pub use backup::*;
pub use build::*;
pub use executor_errors::{ExecutorError, ExecutorResult, ResultExt};
pub use image::ImageName;
pub use ports::*;
pub use repositories::*;
pub use snapshot::*;
pub use task::*;
pub use worker::{steps, StepStatus, TaskWorker};
