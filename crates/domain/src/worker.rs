use async_trait::async_trait;
use executor_errors::{ExecutorError, ExecutorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::ports::EventLogger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Starting,
    Running,
    Success,
    Failure,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Starting => "starting",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 事件日志中使用的步骤名
pub mod steps {
    pub const BUILDER: &str = "builder-exector";
    pub const CALLBACK: &str = "callback";
    pub const LAST: &str = "last";
    pub const BACKUP: &str = "backup_builder";
    pub const RESTORE: &str = "restore_builder";
    pub const DELETE_BACKUP: &str = "delete_backup";
    pub const SHARE: &str = "share";
    pub const SERVICE_CHECK: &str = "service_check";
    pub const PROGRESS: &str = "progress";
}

/// 一个任务对应一个 worker 实例, 执行完即丢弃
#[async_trait]
pub trait TaskWorker: Send {
    fn name(&self) -> &str;
    fn logger(&self) -> Arc<dyn EventLogger>;
    async fn run(&mut self, timeout: Duration) -> ExecutorResult<()>;
    async fn stop(&mut self) -> ExecutorResult<()> {
        Ok(())
    }
    /// 终态失败时调用且只调用一次
    async fn error_callback(&mut self, err: &ExecutorError);
    /// 成功后调用一次, 不参与重试
    async fn on_success(&mut self) -> ExecutorResult<()> {
        Ok(())
    }
}
