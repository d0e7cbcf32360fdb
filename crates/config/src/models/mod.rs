pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod message_queue;
pub mod observability;
pub mod registry;
pub mod storage;

pub use app_config::*;
pub use database::*;
pub use dispatcher::*;
pub use message_queue::*;
pub use observability::*;
pub use registry::*;
pub use storage::*;
