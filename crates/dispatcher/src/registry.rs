use executor_domain::{ExecutorResult, TaskKind, TaskMessage, TaskWorker};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::policy::RetryPolicy;

/// 根据任务消息构造 worker
pub type WorkerConstructor =
    Arc<dyn Fn(&TaskMessage) -> ExecutorResult<Box<dyn TaskWorker>> + Send + Sync>;

#[derive(Clone)]
pub struct WorkerRegistration {
    pub constructor: WorkerConstructor,
    pub policy: RetryPolicy,
}

/// 任务类型到 worker 构造器的映射, 由 Dispatcher 实例持有
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    entries: HashMap<TaskKind, WorkerRegistration>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重复注册时覆盖旧的构造器
    pub fn register<F>(&mut self, kind: TaskKind, policy: RetryPolicy, constructor: F) -> &mut Self
    where
        F: Fn(&TaskMessage) -> ExecutorResult<Box<dyn TaskWorker>> + Send + Sync + 'static,
    {
        debug!(task_type = %kind, max_attempts = policy.max_attempts, "注册 worker");
        self.entries.insert(
            kind,
            WorkerRegistration {
                constructor: Arc::new(constructor),
                policy,
            },
        );
        self
    }

    pub fn get(&self, kind: &TaskKind) -> Option<&WorkerRegistration> {
        self.entries.get(kind)
    }

    pub fn contains(&self, kind: &TaskKind) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &TaskKind> {
        self.entries.keys()
    }
}
