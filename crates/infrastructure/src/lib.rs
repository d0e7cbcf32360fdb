pub mod archive;
pub mod database;
pub mod event_log;
pub mod image_client;
pub mod in_memory_queue;
pub mod message_queue;
pub mod observability;
pub mod process;
pub mod result_store;
pub mod source;
pub mod transfer;

pub use database::*;
pub use event_log::{TracingEventLogger, TracingEventLoggerFactory};
pub use image_client::{CliImageBuilder, CliImageClient};
pub use in_memory_queue::InMemoryTaskQueue;
pub use message_queue::RabbitMqTaskQueue;
pub use observability::{init_logging, init_metrics_exporter, LogFormat, MetricsCollector, MetricsSnapshot};
pub use result_store::{InMemoryResultStore, RedisResultStore};
pub use source::GitSourceFetcher;
pub use transfer::{copy_with_progress, DefaultTransferFactory, LocalTransfer, S3Transfer, SftpTransfer};
