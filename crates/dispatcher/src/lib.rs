//! 任务分发引擎
//!
//! 按任务类型查找注册的 worker 构造器, 在并发上限内启动,
//! 负责重试、panic 恢复和优雅停止。

pub mod dispatcher;
pub mod policy;
pub mod registry;
pub mod supervisor;

pub use dispatcher::{effective_concurrency, host_arch, Dispatcher, DispatcherOptions};
pub use policy::RetryPolicy;
pub use registry::{WorkerConstructor, WorkerRegistration, WorkerRegistry};
pub use supervisor::{TaskHandle, TaskOutcome};
