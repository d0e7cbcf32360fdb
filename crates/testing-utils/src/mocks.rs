//! 外部能力接口的内存 mock

use async_trait::async_trait;
use executor_domain::{
    BuildRequest, CodeSource, CommitInfo, EventLogger, EventLoggerFactory, ExecutorError,
    ExecutorResult, ImageBuilder, ImageClient, MetricsRecorder, RegistryAuth, ResultStore,
    SourceFetcher, StepStatus,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub level: &'static str,
    pub message: String,
    pub step: String,
    pub status: StepStatus,
}

/// 记录所有事件日志
#[derive(Debug, Default)]
pub struct RecordingEventLogger {
    event_id: String,
    events: Mutex<Vec<LoggedEvent>>,
}

impl RecordingEventLogger {
    pub fn new(event_id: &str) -> Arc<Self> {
        Arc::new(Self {
            event_id: event_id.to_string(),
            events: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, level: &'static str, message: &str, step: &str, status: StepStatus) {
        self.events.lock().unwrap().push(LoggedEvent {
            level,
            message: message.to_string(),
            step: step.to_string(),
            status,
        });
    }

    pub fn events(&self) -> Vec<LoggedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn has_event(&self, step: &str, status: StepStatus) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.step == step && e.status == status)
    }

    pub fn count_step(&self, step: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.step == step)
            .count()
    }

    pub fn contains_message(&self, fragment: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.message.contains(fragment))
    }
}

impl EventLogger for RecordingEventLogger {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    fn info(&self, message: &str, step: &str, status: StepStatus) {
        self.push("info", message, step, status);
    }

    fn error(&self, message: &str, step: &str, status: StepStatus) {
        self.push("error", message, step, status);
    }

    fn debug(&self, message: &str, step: &str, status: StepStatus) {
        self.push("debug", message, step, status);
    }
}

/// 同一个 event_id 总是返回同一个 logger
#[derive(Debug, Default)]
pub struct RecordingLoggerFactory {
    loggers: Mutex<HashMap<String, Arc<RecordingEventLogger>>>,
}

impl RecordingLoggerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, event_id: &str) -> Arc<RecordingEventLogger> {
        self.loggers
            .lock()
            .unwrap()
            .entry(event_id.to_string())
            .or_insert_with(|| RecordingEventLogger::new(event_id))
            .clone()
    }
}

impl EventLoggerFactory for RecordingLoggerFactory {
    fn logger(&self, event_id: &str) -> Arc<dyn EventLogger> {
        self.get(event_id)
    }
}

#[derive(Debug, Default)]
pub struct RecordingMetrics {
    pub accepted: AtomicUsize,
    pub failed: AtomicUsize,
    pub returned: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn returned(&self) -> usize {
        self.returned.load(Ordering::SeqCst)
    }
}

impl MetricsRecorder for RecordingMetrics {
    fn task_accepted(&self, _task_type: &str) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    fn task_failed(&self, _task_type: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn task_returned(&self, _task_type: &str) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }

    fn in_flight_changed(&self, in_flight: usize) {
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
    }
}

/// 记录镜像操作, 可以为某个操作注入失败
#[derive(Debug, Default)]
pub struct MockImageClient {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, usize>>,
    missing: Mutex<HashSet<String>>,
    loaded: Mutex<Vec<String>>,
}

impl MockImageClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 让接下来 `times` 次 `op` 调用失败
    pub fn fail_next(&self, op: &str, times: usize) {
        self.failures.lock().unwrap().insert(op.to_string(), times);
    }

    pub fn mark_missing(&self, image: &str) {
        self.missing.lock().unwrap().insert(image.to_string());
    }

    pub fn set_loaded_images(&self, images: Vec<String>) {
        *self.loaded.lock().unwrap() = images;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op} ");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn record(&self, op: &str, detail: &str) -> ExecutorResult<()> {
        self.calls.lock().unwrap().push(format!("{op} {detail}"));
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ExecutorError::image_error(format!("{op} {detail} 失败")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ImageClient for MockImageClient {
    async fn pull(
        &self,
        image: &str,
        _auth: Option<&RegistryAuth>,
        _logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()> {
        self.record("pull", image)
    }

    async fn tag(&self, source: &str, target: &str) -> ExecutorResult<()> {
        self.record("tag", &format!("{source} {target}"))
    }

    async fn push(
        &self,
        image: &str,
        _auth: Option<&RegistryAuth>,
        _logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()> {
        self.record("push", image)
    }

    async fn trusted_push(
        &self,
        image: &str,
        _auth: Option<&RegistryAuth>,
        _logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()> {
        self.record("trusted_push", image)
    }

    async fn save(
        &self,
        image: &str,
        dest: &Path,
        _logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()> {
        self.record("save", image)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, image.as_bytes()).await?;
        Ok(())
    }

    async fn load(&self, src: &Path, _logger: Arc<dyn EventLogger>) -> ExecutorResult<Vec<String>> {
        self.record("load", &src.display().to_string())?;
        Ok(self.loaded.lock().unwrap().clone())
    }

    async fn exists(&self, image: &str, _auth: Option<&RegistryAuth>) -> ExecutorResult<bool> {
        self.record("exists", image)?;
        Ok(!self.missing.lock().unwrap().contains(image))
    }
}

/// 把预设文件写入检出目录
#[derive(Debug)]
pub struct MockSourceFetcher {
    files: Mutex<Vec<(String, String)>>,
    commit: CommitInfo,
    fail: Mutex<bool>,
    fetches: AtomicUsize,
}

impl MockSourceFetcher {
    pub fn new(commit: CommitInfo) -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(Vec::new()),
            commit,
            fail: Mutex::new(false),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn with_file(self: Arc<Self>, name: &str, content: &str) -> Arc<Self> {
        self.files
            .lock()
            .unwrap()
            .push((name.to_string(), content.to_string()));
        self
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for MockSourceFetcher {
    async fn fetch(
        &self,
        source: &CodeSource,
        dest: &Path,
        _logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<CommitInfo> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap() {
            return Err(ExecutorError::Source(format!("clone {} 失败", source.repo_url)));
        }
        tokio::fs::create_dir_all(dest).await?;
        let files = self.files.lock().unwrap().clone();
        for (name, content) in files {
            tokio::fs::write(dest.join(name), content).await?;
        }
        let mut commit = self.commit.clone();
        commit.branch = source.branch.clone();
        Ok(commit)
    }
}

#[derive(Debug, Default)]
pub struct MockImageBuilder {
    requests: Mutex<Vec<BuildRequest>>,
    fail: Mutex<bool>,
}

impl MockImageBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for MockImageBuilder {
    async fn build(&self, request: &BuildRequest, _logger: Arc<dyn EventLogger>) -> ExecutorResult<()> {
        self.requests.lock().unwrap().push(request.clone());
        if *self.fail.lock().unwrap() {
            return Err(ExecutorError::image_error(format!(
                "构建 {} 失败",
                request.image_name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryResultStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryResultStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .and_then(|v| serde_json::from_str(v).ok())
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, key: &str, value: &str) -> ExecutorResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> ExecutorResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }
}
