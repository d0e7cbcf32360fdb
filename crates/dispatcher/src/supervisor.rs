//! 单个任务的监督执行: 超时、重试、panic 捕获与终态回调

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use executor_domain::{steps, ExecutorError, MetricsRecorder, StepStatus, TaskWorker};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::policy::RetryPolicy;

/// 任务的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
    Panicked { message: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }
}

/// 已启动任务的句柄, 可以等待其结束
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    task_type: String,
    handle: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    pub(crate) fn new(task_id: String, task_type: String, handle: JoinHandle<TaskOutcome>) -> Self {
        Self {
            task_id,
            task_type,
            handle,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> TaskOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::Panicked {
                message: e.to_string(),
            },
        }
    }
}

pub(crate) struct Supervision {
    pub task_id: String,
    pub task_type: String,
    pub policy: RetryPolicy,
    pub metrics: Arc<dyn MetricsRecorder>,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 按策略执行 worker, error_callback 最多调用一次
pub(crate) async fn supervise(mut worker: Box<dyn TaskWorker>, sup: Supervision) -> TaskOutcome {
    let Supervision {
        task_id,
        task_type,
        policy,
        metrics,
    } = sup;
    let logger = worker.logger();
    let mut attempt = 0;

    loop {
        attempt += 1;
        info!(
            task_id = %task_id,
            task_type = %task_type,
            worker = %worker.name(),
            attempt,
            "开始执行任务"
        );

        let result = AssertUnwindSafe(tokio::time::timeout(
            policy.timeout,
            worker.run(policy.timeout),
        ))
        .catch_unwind()
        .await;

        let err = match result {
            Ok(Ok(Ok(()))) => {
                finish_success(worker.as_mut(), &task_id).await;
                return TaskOutcome::Succeeded { attempts: attempt };
            }
            Ok(Ok(Err(e))) => e,
            Ok(Err(_)) => ExecutorError::Timeout(format!(
                "任务 {task_id} 超过 {}s 未完成",
                policy.timeout.as_secs()
            )),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(task_id = %task_id, task_type = %task_type, panic = %message, "worker 发生 panic");
                logger.error(
                    &format!("任务执行发生异常: {message}"),
                    steps::CALLBACK,
                    StepStatus::Failure,
                );
                metrics.task_failed(&task_type);
                fail_once(worker.as_mut(), &ExecutorError::WorkerPanic(message.clone()), &task_id)
                    .await;
                return TaskOutcome::Panicked { message };
            }
        };

        if policy.has_retry_after(attempt) {
            warn!(task_id = %task_id, attempt, error = %err, "任务执行失败, will retry");
            logger.info(
                &format!("执行失败, 将重试 (will retry): {err}"),
                steps::BUILDER,
                StepStatus::Running,
            );
            continue;
        }

        error!(task_id = %task_id, task_type = %task_type, attempts = attempt, error = %err, "任务最终失败");
        metrics.task_failed(&task_type);
        fail_once(worker.as_mut(), &err, &task_id).await;
        return TaskOutcome::Failed {
            attempts: attempt,
            error: err.to_string(),
        };
    }
}

async fn finish_success(worker: &mut dyn TaskWorker, task_id: &str) {
    match AssertUnwindSafe(worker.on_success()).catch_unwind().await {
        Ok(Ok(())) => info!(task_id = %task_id, "任务执行成功"),
        Ok(Err(e)) => warn!(task_id = %task_id, error = %e, "任务成功后的处理失败"),
        Err(payload) => error!(
            task_id = %task_id,
            panic = %panic_message(payload.as_ref()),
            "任务成功后的处理发生 panic"
        ),
    }
}

async fn fail_once(worker: &mut dyn TaskWorker, err: &ExecutorError, task_id: &str) {
    if let Err(payload) = AssertUnwindSafe(worker.error_callback(err))
        .catch_unwind()
        .await
    {
        error!(
            task_id = %task_id,
            panic = %panic_message(payload.as_ref()),
            "错误回调发生 panic"
        );
    }
}
