#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use executor_config::{AppConfig, StorageConfig};
use executor_domain::{CommitInfo, TaskMessage, TaskWorker};
use executor_infrastructure::{DatabaseManager, InMemoryTaskQueue};
use executor_testing_utils::{
    MemoryResultStore, MockImageBuilder, MockImageClient, MockSourceFetcher,
    RecordingLoggerFactory, RecordingTransferFactory,
};
use executor_worker::{Collaborators, Repositories, WorkerContext};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub db: DatabaseManager,
    pub images: Arc<MockImageClient>,
    pub sources: Arc<MockSourceFetcher>,
    pub builder: Arc<MockImageBuilder>,
    pub transfers: Arc<RecordingTransferFactory>,
    pub results: Arc<MemoryResultStore>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub loggers: Arc<RecordingLoggerFactory>,
    pub ctx: Arc<WorkerContext>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_sources(MockSourceFetcher::new(CommitInfo {
            hash: "abc123".into(),
            message: "init".into(),
            author: "dev".into(),
            branch: String::new(),
        }))
        .await
    }

    pub async fn with_sources(sources: Arc<MockSourceFetcher>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let mut config = AppConfig::default();
        config.storage = StorageConfig::rooted_at(&root.to_string_lossy());

        let db = DatabaseManager::in_memory().await.unwrap();
        let images = MockImageClient::new();
        let builder = MockImageBuilder::new();
        let transfers = RecordingTransferFactory::new(dir.path().join("remote"));
        let results = MemoryResultStore::new();
        let queue = Arc::new(InMemoryTaskQueue::new());
        let loggers = RecordingLoggerFactory::new();

        let ctx = WorkerContext::new(
            &config,
            Repositories {
                backups: db.app_backup_repository(),
                services: db.service_repository(),
                versions: db.version_repository(),
                plugin_builds: db.plugin_build_repository(),
            },
            Collaborators {
                images: images.clone(),
                sources: sources.clone(),
                builder: builder.clone(),
                transfers: transfers.clone(),
                results: results.clone(),
                queue: queue.clone(),
                loggers: loggers.clone(),
            },
        );

        Self {
            dir,
            db,
            images,
            sources,
            builder,
            transfers,
            results,
            queue,
            loggers,
            ctx: Arc::new(ctx),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .fetch_one(self.db.pool())
            .await
            .unwrap()
    }

    pub async fn count_for(&self, table: &str, service_id: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE service_id = $1");
        sqlx::query_scalar(&sql)
            .bind(service_id)
            .fetch_one(self.db.pool())
            .await
            .unwrap()
    }
}

/// 与分发器相同的执行顺序: run 成功后 on_success, 失败后 error_callback
pub async fn drive(worker: &mut dyn TaskWorker) -> executor_domain::ExecutorResult<()> {
    match worker.run(std::time::Duration::from_secs(30)).await {
        Ok(()) => worker.on_success().await,
        Err(e) => {
            worker.error_callback(&e).await;
            Err(e)
        }
    }
}

pub fn task(task_type: &str, body: serde_json::Value) -> TaskMessage {
    TaskMessage::new(task_type, body)
}
