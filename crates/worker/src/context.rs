use std::sync::Arc;

use executor_config::{AppConfig, BackupS3Config, RegistryConfig, StorageConfig};
use executor_domain::{
    AppBackupRepository, EventLogger, EventLoggerFactory, ExecutorError, ExecutorResult,
    ImageBuilder, ImageClient, PluginBuildRepository, RegistryAuth, ResultStore, S3Config,
    S3Target, ServiceRepository, SourceFetcher, TaskMessage, TaskQueue, TransferFactory,
    VersionRepository,
};

use crate::bundle;

/// worker 运行需要的全部依赖, 启动时组装一次后在所有 worker 间共享
#[derive(Clone)]
pub struct WorkerContext {
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub backup_s3: Option<BackupS3Config>,
    /// 滚动升级任务投递的主题
    pub worker_topic: String,
    pub backups: Arc<dyn AppBackupRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub versions: Arc<dyn VersionRepository>,
    pub plugin_builds: Arc<dyn PluginBuildRepository>,
    pub images: Arc<dyn ImageClient>,
    pub sources: Arc<dyn SourceFetcher>,
    pub builder: Arc<dyn ImageBuilder>,
    pub transfers: Arc<dyn TransferFactory>,
    pub results: Arc<dyn ResultStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub loggers: Arc<dyn EventLoggerFactory>,
}

/// 仓储部分单独成组, 方便测试时替换
#[derive(Clone)]
pub struct Repositories {
    pub backups: Arc<dyn AppBackupRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub versions: Arc<dyn VersionRepository>,
    pub plugin_builds: Arc<dyn PluginBuildRepository>,
}

/// 外部能力
#[derive(Clone)]
pub struct Collaborators {
    pub images: Arc<dyn ImageClient>,
    pub sources: Arc<dyn SourceFetcher>,
    pub builder: Arc<dyn ImageBuilder>,
    pub transfers: Arc<dyn TransferFactory>,
    pub results: Arc<dyn ResultStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub loggers: Arc<dyn EventLoggerFactory>,
}

impl WorkerContext {
    pub fn new(config: &AppConfig, repos: Repositories, collaborators: Collaborators) -> Self {
        Self {
            storage: config.storage.clone(),
            registry: config.registry.clone(),
            backup_s3: config.backup_s3.clone(),
            worker_topic: config.message_queue.worker_topic.clone(),
            backups: repos.backups,
            services: repos.services,
            versions: repos.versions,
            plugin_builds: repos.plugin_builds,
            images: collaborators.images,
            sources: collaborators.sources,
            builder: collaborators.builder,
            transfers: collaborators.transfers,
            results: collaborators.results,
            queue: collaborators.queue,
            loggers: collaborators.loggers,
        }
    }

    /// 平台内部镜像仓库的凭据
    pub fn registry_auth(&self) -> Option<RegistryAuth> {
        match (&self.registry.user, &self.registry.password) {
            (Some(user), password) if !user.is_empty() => Some(RegistryAuth::new(
                user.clone(),
                password.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }

    /// 任务体没有 event_id 时退回到 task_id
    pub fn logger_for(&self, event_id: &str, task: &TaskMessage) -> Arc<dyn EventLogger> {
        if event_id.is_empty() {
            self.loggers.logger(&task.task_id)
        } else {
            self.loggers.logger(event_id)
        }
    }

    pub fn configured_s3(&self) -> Option<S3Target> {
        self.backup_s3.as_ref().map(|s3| S3Target {
            endpoint: s3.endpoint.clone(),
            region: if s3.region.is_empty() {
                "us-east-1".to_string()
            } else {
                s3.region.clone()
            },
            access_key: s3.access_key.clone(),
            secret_key: s3.secret_key.clone(),
            bucket: s3.bucket.clone(),
        })
    }

    /// 任务里携带的对象存储配置优先, 否则使用执行器配置
    pub fn s3_target(&self, explicit: Option<&S3Config>) -> Option<S3Target> {
        explicit.map(S3Config::target).or_else(|| self.configured_s3())
    }

    /// 备份包在对象存储中的位置, source_dir 里的桶名优先
    pub fn s3_location(
        &self,
        explicit: Option<&S3Config>,
        source_dir: &str,
    ) -> ExecutorResult<(S3Target, String)> {
        let mut target = self.s3_target(explicit).ok_or_else(|| {
            ExecutorError::config_error("访问对象存储中的备份需要 s3_config 或 backup_s3 配置")
        })?;
        let (bucket, key) = bundle::parse_s3_location(source_dir);
        if let Some(bucket) = bucket {
            target.bucket = bucket;
        }
        Ok((target, key))
    }

    /// `{registry.domain}/{name}:{tag}`
    pub fn local_image_name(&self, name: &str, tag: &str) -> String {
        format!("{}/{}:{}", self.registry.domain, name, tag)
    }
}
