use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use executor_config::{AppConfig, MessageQueueType, ResultStoreType};
use executor_dispatcher::{Dispatcher, DispatcherOptions, WorkerRegistry};
use executor_domain::{ExecutorError, ResultStore, TaskQueue};
use executor_infrastructure::{
    init_metrics_exporter, CliImageBuilder, CliImageClient, DatabaseManager,
    DefaultTransferFactory, GitSourceFetcher, InMemoryResultStore, InMemoryTaskQueue,
    MetricsCollector, RabbitMqTaskQueue, RedisResultStore, TracingEventLoggerFactory,
};
use executor_worker::{register_all, Collaborators, Repositories, WorkerContext};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 具体的队列实现, 关闭时需要区分
enum QueueBackend {
    Rabbit(Arc<RabbitMqTaskQueue>),
    Memory(Arc<InMemoryTaskQueue>),
}

impl QueueBackend {
    fn as_dyn(&self) -> Arc<dyn TaskQueue> {
        match self {
            QueueBackend::Rabbit(queue) => queue.clone(),
            QueueBackend::Memory(queue) => queue.clone(),
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            QueueBackend::Rabbit(queue) => queue.close().await?,
            QueueBackend::Memory(queue) => queue.close().await,
        }
        Ok(())
    }
}

/// 执行器进程: 组装依赖并运行消费循环
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    queue: QueueBackend,
    dispatcher: Dispatcher,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        if config.observability.metrics_enabled {
            let bind: SocketAddr = config
                .observability
                .metrics_bind_address
                .parse()
                .with_context(|| {
                    format!("无效的指标监听地址: {}", config.observability.metrics_bind_address)
                })?;
            init_metrics_exporter(bind)?;
        }

        let database = DatabaseManager::new(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(config.database.connection_timeout_seconds),
        )
        .await
        .context("连接数据库失败")?;

        let queue = create_task_queue(&config).await?;
        let results = create_result_store(&config).await?;

        let ctx = WorkerContext::new(
            &config,
            Repositories {
                backups: database.app_backup_repository(),
                services: database.service_repository(),
                versions: database.version_repository(),
                plugin_builds: database.plugin_build_repository(),
            },
            Collaborators {
                images: Arc::new(CliImageClient::new(config.registry.cli.clone())),
                sources: Arc::new(GitSourceFetcher::new("git")),
                builder: Arc::new(CliImageBuilder::new(config.registry.cli.clone())),
                transfers: Arc::new(DefaultTransferFactory::new()),
                results,
                queue: queue.as_dyn(),
                loggers: Arc::new(TracingEventLoggerFactory),
            },
        );

        let mut registry = WorkerRegistry::new();
        register_all(&mut registry, Arc::new(ctx), &config.dispatcher);

        let dispatcher = Dispatcher::new(
            registry,
            DispatcherOptions::from_config(
                &config.dispatcher,
                config.message_queue.builder_topic.clone(),
            ),
            Arc::new(MetricsCollector::new()),
            queue.as_dyn(),
        );

        Ok(Self {
            config,
            database,
            queue,
            dispatcher,
        })
    }

    /// 消费构建主题, 直到收到关闭信号
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            topic = %self.config.message_queue.builder_topic,
            queue = ?self.config.message_queue.r#type,
            "执行器已启动"
        );
        self.dispatcher
            .run(&self.config.message_queue.builder_topic, shutdown)
            .await?;
        Ok(())
    }

    /// 等待执行中的任务结束后释放连接
    pub async fn stop(&self) -> Result<()> {
        match self.dispatcher.stop().await {
            Ok(()) => {}
            Err(ExecutorError::ShutdownTimeout { outstanding }) => {
                warn!(outstanding, "关闭超时, 仍有任务未结束");
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.queue.close().await {
            warn!("关闭任务队列失败: {e}");
        }
        self.database.close().await;
        info!("执行器资源已释放");
        Ok(())
    }
}

async fn create_task_queue(config: &AppConfig) -> Result<QueueBackend> {
    match config.message_queue.r#type {
        MessageQueueType::Rabbitmq => {
            let queue = RabbitMqTaskQueue::connect(&config.message_queue)
                .await
                .context("连接 RabbitMQ 失败")?;
            Ok(QueueBackend::Rabbit(Arc::new(queue)))
        }
        MessageQueueType::InMemory => {
            info!("使用内存任务队列");
            Ok(QueueBackend::Memory(Arc::new(InMemoryTaskQueue::new())))
        }
    }
}

async fn create_result_store(config: &AppConfig) -> Result<Arc<dyn ResultStore>> {
    match config.result_store.r#type {
        ResultStoreType::Redis => {
            let store = RedisResultStore::connect(&config.result_store.url)
                .await
                .context("连接 Redis 失败")?;
            Ok(Arc::new(store))
        }
        ResultStoreType::InMemory => Ok(Arc::new(InMemoryResultStore::new())),
    }
}
