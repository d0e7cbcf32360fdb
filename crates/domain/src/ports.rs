//! 外部能力抽象
//!
//! 镜像运行时、源码仓库、文件传输、事件日志、结果存储和消息队列都只通过这些接口访问。

use async_trait::async_trait;
use executor_errors::ExecutorResult;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::build::CommitInfo;
use crate::task::TaskMessage;
use crate::worker::StepStatus;

/// 面向用户的进度日志, 每条事件都带 step 和 status
pub trait EventLogger: Send + Sync {
    fn event_id(&self) -> &str;
    fn info(&self, message: &str, step: &str, status: StepStatus);
    fn error(&self, message: &str, step: &str, status: StepStatus);
    fn debug(&self, message: &str, step: &str, status: StepStatus);
}

pub trait EventLoggerFactory: Send + Sync {
    fn logger(&self, event_id: &str) -> Arc<dyn EventLogger>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    pub user: String,
    pub password: String,
}

impl RegistryAuth {
    pub fn new<U: Into<String>, P: Into<String>>(user: U, password: P) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// 用户名为空时视为匿名访问
    pub fn optional(user: &str, password: &str) -> Option<Self> {
        if user.is_empty() {
            None
        } else {
            Some(Self::new(user, password))
        }
    }
}

#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()>;
    async fn tag(&self, source: &str, target: &str) -> ExecutorResult<()>;
    async fn push(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()>;
    /// 推送到开启内容信任的仓库
    async fn trusted_push(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()>;
    async fn save(
        &self,
        image: &str,
        dest: &Path,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()>;
    /// 返回导入的镜像引用
    async fn load(&self, src: &Path, logger: Arc<dyn EventLogger>) -> ExecutorResult<Vec<String>>;
    /// 镜像在远端仓库中是否存在
    async fn exists(&self, image: &str, auth: Option<&RegistryAuth>) -> ExecutorResult<bool>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSource {
    pub repo_url: String,
    pub branch: String,
    pub user: String,
    pub password: String,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &CodeSource,
        dest: &Path,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<CommitInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    pub dockerfile: String,
    pub image_name: String,
    pub build_args: BTreeMap<String, String>,
}

/// 镜像构建委托给外部构建器
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest, logger: Arc<dyn EventLogger>) -> ExecutorResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Local,
    Sftp,
    S3,
}

#[async_trait]
pub trait Transfer: Send + Sync {
    fn kind(&self) -> TransferKind;
    /// 上传本地文件, 返回传输的字节数
    async fn push_file(
        &self,
        local: &Path,
        remote: &str,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64>;
    /// 下载到本地文件, 返回传输的字节数
    async fn download_file(
        &self,
        remote: &str,
        local: &Path,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64>;
    /// 删除远端文件, 文件系统类存储上目录整体删除; 不存在时返回 false
    async fn delete(&self, remote: &str) -> ExecutorResult<bool>;
    async fn exists(&self, remote: &str) -> ExecutorResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Target {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

pub trait TransferFactory: Send + Sync {
    fn local(&self) -> Arc<dyn Transfer>;
    fn sftp(&self, target: &SftpTarget) -> ExecutorResult<Arc<dyn Transfer>>;
    fn s3(&self, target: &S3Target) -> ExecutorResult<Arc<dyn Transfer>>;
}

/// 共享KV存储, 用于发布恢复、分享和检测结果
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> ExecutorResult<()>;
    async fn get(&self, key: &str) -> ExecutorResult<Option<String>>;
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn publish(&self, topic: &str, task: &TaskMessage) -> ExecutorResult<()>;
    /// 等待下一条消息, 队列关闭时返回 None
    async fn receive(&self, topic: &str) -> ExecutorResult<Option<TaskMessage>>;
}

pub trait MetricsRecorder: Send + Sync {
    fn task_accepted(&self, task_type: &str);
    fn task_failed(&self, task_type: &str);
    fn task_returned(&self, task_type: &str);
    fn in_flight_changed(&self, in_flight: usize);
}
