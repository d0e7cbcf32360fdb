use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use executor_dispatcher::{
    Dispatcher, DispatcherOptions, RetryPolicy, TaskOutcome, WorkerRegistry,
};
use executor_domain::{
    steps, EventLogger, ExecutorError, ExecutorResult, StepStatus, TaskKind, TaskMessage,
    TaskQueue, TaskWorker,
};
use executor_testing_utils::{RecordingEventLogger, RecordingMetrics};

#[derive(Clone)]
enum Behavior {
    FailTimes(usize),
    AlwaysFail,
    Panic,
    Sleep(Duration),
    WaitFor(Arc<Notify>),
}

#[derive(Default)]
struct Counters {
    runs: AtomicUsize,
    callbacks: AtomicUsize,
    successes: AtomicUsize,
}

struct ScriptedWorker {
    behavior: Behavior,
    counters: Arc<Counters>,
    logger: Arc<RecordingEventLogger>,
}

#[async_trait]
impl TaskWorker for ScriptedWorker {
    fn name(&self) -> &str {
        "scripted"
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        let run = self.counters.runs.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::FailTimes(n) if run < *n => {
                Err(ExecutorError::image_error("registry unavailable"))
            }
            Behavior::FailTimes(_) => Ok(()),
            Behavior::AlwaysFail => Err(ExecutorError::image_error("push rejected")),
            Behavior::Panic => panic!("worker exploded"),
            Behavior::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(())
            }
            Behavior::WaitFor(notify) => {
                notify.notified().await;
                Ok(())
            }
        }
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        self.counters.callbacks.fetch_add(1, Ordering::SeqCst);
        self.logger
            .error(&err.to_string(), steps::CALLBACK, StepStatus::Failure);
    }

    async fn on_success(&mut self) -> ExecutorResult<()> {
        self.counters.successes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingQueue {
    pending: Mutex<VecDeque<TaskMessage>>,
    published: Mutex<Vec<(String, TaskMessage)>>,
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn publish(&self, topic: &str, task: &TaskMessage) -> ExecutorResult<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), task.clone()));
        Ok(())
    }

    /// 取完即视为队列关闭
    async fn receive(&self, _topic: &str) -> ExecutorResult<Option<TaskMessage>> {
        Ok(self.pending.lock().unwrap().pop_front())
    }
}

struct Harness {
    dispatcher: Dispatcher,
    counters: Arc<Counters>,
    logger: Arc<RecordingEventLogger>,
    metrics: Arc<RecordingMetrics>,
    queue: Arc<RecordingQueue>,
}

fn options(max_concurrent: usize) -> DispatcherOptions {
    DispatcherOptions {
        max_concurrent_tasks: max_concurrent,
        shutdown_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(20),
        builder_topic: "builder".to_string(),
        host_arch: "amd64".to_string(),
    }
}

fn harness(
    kind: TaskKind,
    policy: RetryPolicy,
    behavior: Behavior,
    options: DispatcherOptions,
) -> Harness {
    let counters = Arc::new(Counters::default());
    let logger = RecordingEventLogger::new("event-1");
    let metrics = RecordingMetrics::new();
    let queue = Arc::new(RecordingQueue::default());

    let mut registry = WorkerRegistry::new();
    let (c, l) = (counters.clone(), logger.clone());
    registry.register(kind, policy, move |_task| {
        Ok(Box::new(ScriptedWorker {
            behavior: behavior.clone(),
            counters: c.clone(),
            logger: l.clone(),
        }) as Box<dyn TaskWorker>)
    });

    let dispatcher = Dispatcher::new(registry, options, metrics.clone(), queue.clone());
    Harness {
        dispatcher,
        counters,
        logger,
        metrics,
        queue,
    }
}

fn two_attempts() -> RetryPolicy {
    RetryPolicy::attempts(2, Duration::from_secs(5))
}

#[tokio::test]
async fn test_image_build_retries_once_then_succeeds() {
    let h = harness(
        TaskKind::BuildFromImage,
        two_attempts(),
        Behavior::FailTimes(1),
        options(4),
    );

    let handle = h
        .dispatcher
        .add_task(TaskMessage::new("build_from_image", json!({})))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(handle.wait().await, TaskOutcome::Succeeded { attempts: 2 });
    assert_eq!(h.counters.runs.load(Ordering::SeqCst), 2);
    assert_eq!(h.counters.callbacks.load(Ordering::SeqCst), 0);
    assert_eq!(h.counters.successes.load(Ordering::SeqCst), 1);
    assert!(h.logger.contains_message("will retry"));
    assert_eq!(h.metrics.accepted(), 1);
    assert_eq!(h.metrics.failed(), 0);
}

#[tokio::test]
async fn test_second_failure_is_terminal() {
    let h = harness(
        TaskKind::BuildFromMarketSlug,
        two_attempts(),
        Behavior::AlwaysFail,
        options(4),
    );

    let handle = h
        .dispatcher
        .add_task(TaskMessage::new("build_from_market_slug", json!({})))
        .await
        .unwrap()
        .unwrap();

    match handle.wait().await {
        TaskOutcome::Failed { attempts, error } => {
            assert_eq!(attempts, 2);
            assert!(error.contains("push rejected"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.counters.runs.load(Ordering::SeqCst), 2);
    assert_eq!(h.counters.callbacks.load(Ordering::SeqCst), 1);
    assert_eq!(h.metrics.failed(), 1);
    assert!(h.logger.has_event(steps::CALLBACK, StepStatus::Failure));
}

#[tokio::test]
async fn test_source_build_runs_exactly_once() {
    let h = harness(
        TaskKind::BuildFromSourceCode,
        RetryPolicy::once(Duration::from_secs(5)),
        Behavior::AlwaysFail,
        options(4),
    );

    let handle = h
        .dispatcher
        .add_task(TaskMessage::new("build_from_source_code", json!({})))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        handle.wait().await,
        TaskOutcome::Failed { attempts: 1, .. }
    ));
    assert_eq!(h.counters.runs.load(Ordering::SeqCst), 1);
    assert_eq!(h.counters.callbacks.load(Ordering::SeqCst), 1);
    assert!(!h.logger.contains_message("will retry"));
}

#[tokio::test]
async fn test_panic_is_contained_and_calls_back_once() {
    let h = harness(
        TaskKind::generic("backup_apps_new"),
        two_attempts(),
        Behavior::Panic,
        options(4),
    );

    let handle = h
        .dispatcher
        .add_task(TaskMessage::new("backup_apps_new", json!({})))
        .await
        .unwrap()
        .unwrap();

    match handle.wait().await {
        TaskOutcome::Panicked { message } => assert!(message.contains("worker exploded")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    // panic 不重试
    assert_eq!(h.counters.runs.load(Ordering::SeqCst), 1);
    assert_eq!(h.counters.callbacks.load(Ordering::SeqCst), 1);
    assert_eq!(h.dispatcher.in_flight(), 0);

    // 分发器仍然可以接收任务
    let next = h
        .dispatcher
        .add_task(TaskMessage::new("backup_apps_new", json!({})))
        .await
        .unwrap();
    assert!(next.is_some());
}

#[tokio::test]
async fn test_attempt_timeout_counts_as_failure() {
    let h = harness(
        TaskKind::generic("delete_backup"),
        RetryPolicy::once(Duration::from_millis(50)),
        Behavior::Sleep(Duration::from_secs(10)),
        options(4),
    );

    let handle = h
        .dispatcher
        .add_task(TaskMessage::new("delete_backup", json!({})))
        .await
        .unwrap()
        .unwrap();

    match handle.wait().await {
        TaskOutcome::Failed { attempts, error } => {
            assert_eq!(attempts, 1);
            assert!(error.contains("超时"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.counters.callbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_type_is_rejected() {
    let h = harness(
        TaskKind::BuildFromImage,
        two_attempts(),
        Behavior::FailTimes(0),
        options(4),
    );

    let result = h
        .dispatcher
        .add_task(TaskMessage::new("no_such_task", json!({})))
        .await;
    assert!(matches!(result, Err(ExecutorError::UnsupportedTaskType(t)) if t == "no_such_task"));
    assert_eq!(h.metrics.accepted(), 0);
}

#[tokio::test]
async fn test_warmup_and_empty_types_are_ignored() {
    let h = harness(
        TaskKind::BuildFromImage,
        two_attempts(),
        Behavior::FailTimes(0),
        options(4),
    );

    assert!(h
        .dispatcher
        .add_task(TaskMessage::new("warmup", json!({})))
        .await
        .unwrap()
        .is_none());
    assert!(h
        .dispatcher
        .add_task(TaskMessage::new("", json!({})))
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.metrics.accepted(), 0);
    assert_eq!(h.counters.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_foreign_arch_is_returned_to_builder_topic() {
    let h = harness(
        TaskKind::BuildFromImage,
        two_attempts(),
        Behavior::FailTimes(0),
        options(4),
    );

    let task = TaskMessage::new("build_from_image", json!({})).with_arch("arm64");
    assert!(h.dispatcher.add_task(task.clone()).await.unwrap().is_none());

    let published = h.queue.published.lock().unwrap().clone();
    assert_eq!(published, vec![("builder".to_string(), task)]);
    assert_eq!(h.metrics.returned(), 1);
    assert_eq!(h.counters.runs.load(Ordering::SeqCst), 0);

    let same_arch = TaskMessage::new("build_from_image", json!({})).with_arch("amd64");
    let handle = h.dispatcher.add_task(same_arch).await.unwrap().unwrap();
    assert!(handle.wait().await.is_success());
}

#[tokio::test]
async fn test_full_dispatcher_blocks_producer() {
    let gate = Arc::new(Notify::new());
    let h = harness(
        TaskKind::BuildFromImage,
        two_attempts(),
        Behavior::WaitFor(gate.clone()),
        options(1),
    );

    let first = h
        .dispatcher
        .add_task(TaskMessage::new("build_from_image", json!({})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.dispatcher.in_flight(), 1);

    let blocked = tokio::time::timeout(
        Duration::from_millis(100),
        h.dispatcher
            .add_task(TaskMessage::new("build_from_image", json!({}))),
    )
    .await;
    assert!(blocked.is_err(), "第二个任务应当等待并发额度");

    gate.notify_one();
    assert!(first.wait().await.is_success());

    let second = h
        .dispatcher
        .add_task(TaskMessage::new("build_from_image", json!({})))
        .await
        .unwrap()
        .unwrap();
    gate.notify_one();
    assert!(second.wait().await.is_success());
    assert_eq!(h.metrics.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_reports_outstanding_tasks_after_deadline() {
    let gate = Arc::new(Notify::new());
    let mut opts = options(4);
    opts.shutdown_timeout = Duration::from_millis(150);
    let h = harness(
        TaskKind::BuildFromImage,
        two_attempts(),
        Behavior::WaitFor(gate.clone()),
        opts,
    );

    let handle = h
        .dispatcher
        .add_task(TaskMessage::new("build_from_image", json!({})))
        .await
        .unwrap()
        .unwrap();

    let result = h.dispatcher.stop().await;
    assert!(matches!(
        result,
        Err(ExecutorError::ShutdownTimeout { outstanding: 1 })
    ));
    assert!(!h.dispatcher.is_accepting());
    assert!(h
        .dispatcher
        .add_task(TaskMessage::new("build_from_image", json!({})))
        .await
        .is_err());

    gate.notify_one();
    assert!(handle.wait().await.is_success());
    assert!(h.dispatcher.stop().await.is_ok());
}

#[tokio::test]
async fn test_stop_waits_for_running_tasks() {
    let h = harness(
        TaskKind::BuildFromImage,
        two_attempts(),
        Behavior::Sleep(Duration::from_millis(100)),
        options(4),
    );

    for _ in 0..3 {
        h.dispatcher
            .add_task(TaskMessage::new("build_from_image", json!({})))
            .await
            .unwrap();
    }
    assert!(h.dispatcher.stop().await.is_ok());
    assert_eq!(h.dispatcher.in_flight(), 0);
    assert_eq!(h.counters.successes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_run_consumes_until_queue_closes() {
    let h = harness(
        TaskKind::BuildFromImage,
        two_attempts(),
        Behavior::FailTimes(0),
        options(4),
    );
    {
        let mut pending = h.queue.pending.lock().unwrap();
        pending.push_back(TaskMessage::new("build_from_image", json!({})));
        pending.push_back(TaskMessage::new("unknown_type", json!({})));
        pending.push_back(TaskMessage::new("build_from_image", json!({})));
    }

    let (_tx, rx) = broadcast::channel(1);
    h.dispatcher.run("builder", rx).await.unwrap();
    h.dispatcher.stop().await.unwrap();

    assert_eq!(h.metrics.accepted(), 2);
    assert_eq!(h.counters.successes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    struct IdleQueue;

    #[async_trait]
    impl TaskQueue for IdleQueue {
        async fn publish(&self, _topic: &str, _task: &TaskMessage) -> ExecutorResult<()> {
            Ok(())
        }

        async fn receive(&self, _topic: &str) -> ExecutorResult<Option<TaskMessage>> {
            std::future::pending().await
        }
    }

    let dispatcher = Dispatcher::new(
        WorkerRegistry::new(),
        options(1),
        RecordingMetrics::new(),
        Arc::new(IdleQueue),
    );
    let (tx, rx) = broadcast::channel(1);
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
    });

    tokio::time::timeout(Duration::from_secs(2), dispatcher.run("builder", rx))
        .await
        .expect("关闭信号后应当退出")
        .unwrap();
    stopper.await.unwrap();
}
