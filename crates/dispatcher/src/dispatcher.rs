use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use executor_config::DispatcherConfig;
use executor_domain::{
    ExecutorError, ExecutorResult, MetricsRecorder, TaskKind, TaskMessage, TaskQueue,
};
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::registry::WorkerRegistry;
use crate::supervisor::{supervise, Supervision, TaskHandle};

/// 将 Rust 的架构名映射为队列消息使用的 amd64/arm64
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// 并发上限取配置值与 CPU 核数两倍中的较大者
pub fn effective_concurrency(configured: usize) -> usize {
    configured.max(num_cpus::get() * 2).max(1)
}

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub max_concurrent_tasks: usize,
    pub shutdown_timeout: Duration,
    pub poll_interval: Duration,
    /// 架构不匹配的任务会被退回到该主题
    pub builder_topic: String,
    pub host_arch: String,
}

impl DispatcherOptions {
    pub fn from_config(config: &DispatcherConfig, builder_topic: impl Into<String>) -> Self {
        Self {
            max_concurrent_tasks: effective_concurrency(config.max_concurrent_tasks),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_seconds),
            poll_interval: Duration::from_secs(config.shutdown_poll_interval_seconds.max(1)),
            builder_topic: builder_topic.into(),
            host_arch: host_arch().to_string(),
        }
    }
}

/// 执行中任务计数, drop 时自动归还并发额度
struct InFlightGuard {
    counter: Arc<watch::Sender<usize>>,
    metrics: Arc<dyn MetricsRecorder>,
    _permit: OwnedSemaphorePermit,
}

impl InFlightGuard {
    fn enter(
        counter: Arc<watch::Sender<usize>>,
        metrics: Arc<dyn MetricsRecorder>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        counter.send_modify(|n| *n += 1);
        metrics.in_flight_changed(*counter.borrow());
        Self {
            counter,
            metrics,
            _permit: permit,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
        self.metrics.in_flight_changed(*self.counter.borrow());
    }
}

/// 任务分发器: 按任务类型构造 worker, 在并发上限内监督执行
pub struct Dispatcher {
    registry: WorkerRegistry,
    options: DispatcherOptions,
    metrics: Arc<dyn MetricsRecorder>,
    queue: Arc<dyn TaskQueue>,
    permits: Arc<Semaphore>,
    accepting: AtomicBool,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Dispatcher {
    pub fn new(
        registry: WorkerRegistry,
        options: DispatcherOptions,
        metrics: Arc<dyn MetricsRecorder>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        let permits = Arc::new(Semaphore::new(options.max_concurrent_tasks.max(1)));
        info!(
            max_concurrent_tasks = options.max_concurrent_tasks,
            registered = registry.len(),
            host_arch = %options.host_arch,
            "任务分发器已创建"
        );
        Self {
            registry,
            options,
            metrics,
            queue,
            permits,
            accepting: AtomicBool::new(true),
            in_flight: Arc::new(in_flight),
        }
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// 接收一个任务。并发已满时阻塞调用方, 直到有空闲额度。
    ///
    /// 返回 `None` 表示任务被忽略或退回队列。
    pub async fn add_task(&self, task: TaskMessage) -> ExecutorResult<Option<TaskHandle>> {
        if !self.is_accepting() {
            return Err(ExecutorError::TaskExecution(
                "任务分发器已停止, 拒绝新任务".to_string(),
            ));
        }

        let kind = task.kind();
        if task.task_type.is_empty() || kind == TaskKind::Warmup {
            debug!(task_id = %task.task_id, "忽略预热任务");
            return Ok(None);
        }

        if let Some(arch) = task.arch.as_deref().filter(|a| !a.is_empty()) {
            if arch != self.options.host_arch {
                info!(
                    task_id = %task.task_id,
                    task_arch = %arch,
                    host_arch = %self.options.host_arch,
                    "任务架构与本节点不符, 退回队列"
                );
                self.queue
                    .publish(&self.options.builder_topic, &task)
                    .await?;
                self.metrics.task_returned(&task.task_type);
                return Ok(None);
            }
        }

        let registration = self
            .registry
            .get(&kind)
            .ok_or_else(|| ExecutorError::UnsupportedTaskType(task.task_type.clone()))?;

        let worker = match (registration.constructor)(&task) {
            Ok(worker) => worker,
            Err(e) => {
                error!(task_id = %task.task_id, task_type = %task.task_type, error = %e, "创建 worker 失败");
                self.metrics.task_failed(&task.task_type);
                return Err(e);
            }
        };

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ExecutorError::Internal(format!("并发控制已关闭: {e}")))?;

        self.metrics.task_accepted(&task.task_type);
        let guard = InFlightGuard::enter(self.in_flight.clone(), self.metrics.clone(), permit);

        let supervision = Supervision {
            task_id: task.task_id.clone(),
            task_type: task.task_type.clone(),
            policy: registration.policy,
            metrics: self.metrics.clone(),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            supervise(worker, supervision).await
        });

        Ok(Some(TaskHandle::new(task.task_id, task.task_type, handle)))
    }

    /// 从队列消费任务, 直到收到关闭信号或队列关闭
    pub async fn run(&self, topic: &str, mut shutdown: broadcast::Receiver<()>) -> ExecutorResult<()> {
        info!(topic = %topic, "开始消费任务");
        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => {
                    info!("收到关闭信号, 停止消费任务");
                    break;
                }
                received = self.queue.receive(topic) => received,
            };

            match received {
                Ok(Some(task)) => {
                    let task_id = task.task_id.clone();
                    let task_type = task.task_type.clone();
                    match self.add_task(task).await {
                        Ok(Some(handle)) => {
                            debug!(task_id = %handle.task_id(), "任务已启动");
                        }
                        Ok(None) => {}
                        Err(e @ ExecutorError::UnsupportedTaskType(_)) => {
                            warn!(task_id = %task_id, task_type = %task_type, error = %e, "丢弃不支持的任务");
                        }
                        Err(e) => {
                            error!(task_id = %task_id, task_type = %task_type, error = %e, "任务分发失败");
                        }
                    }
                }
                Ok(None) => {
                    info!(topic = %topic, "任务队列已关闭");
                    break;
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "接收任务失败");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.options.poll_interval) => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// 停止接收新任务, 在超时前等待执行中的任务结束
    pub async fn stop(&self) -> ExecutorResult<()> {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + self.options.shutdown_timeout;
        let mut changes = self.in_flight.subscribe();

        loop {
            let outstanding = *changes.borrow_and_update();
            if outstanding == 0 {
                info!("所有任务已结束, 分发器已停止");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(outstanding, "等待任务结束超时");
                return Err(ExecutorError::ShutdownTimeout { outstanding });
            }
            info!(outstanding, "等待执行中的任务结束");
            let wait = self.options.poll_interval.min(deadline - now);
            tokio::select! {
                _ = changes.changed() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_arch_uses_go_names() {
        let arch = host_arch();
        assert!(!arch.is_empty());
        assert_ne!(arch, "x86_64");
        assert_ne!(arch, "aarch64");
    }

    #[test]
    fn test_effective_concurrency_has_cpu_floor() {
        let floor = num_cpus::get() * 2;
        assert_eq!(effective_concurrency(0), floor.max(1));
        assert_eq!(effective_concurrency(floor + 5), floor + 5);
    }

    #[test]
    fn test_options_from_config() {
        let config = DispatcherConfig::default();
        let options = DispatcherOptions::from_config(&config, "builder");
        assert_eq!(options.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(options.poll_interval, Duration::from_secs(2));
        assert_eq!(options.builder_topic, "builder");
        assert!(options.max_concurrent_tasks >= 10);
    }
}
