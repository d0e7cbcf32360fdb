use executor_errors::{ExecutorError, ExecutorResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 消息队列中的任务信封, task_body 的结构由 task_type 决定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    #[serde(default)]
    pub task_id: String,
    pub task_type: String,
    #[serde(default)]
    pub task_body: serde_json::Value,
    /// 指定执行节点的CPU架构, 使用 amd64/arm64 命名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

impl TaskMessage {
    pub fn new<T: Into<String>>(task_type: T, task_body: serde_json::Value) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().simple().to_string(),
            task_type: task_type.into(),
            task_body,
            arch: None,
        }
    }

    pub fn with_arch<S: Into<String>>(mut self, arch: S) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn kind(&self) -> TaskKind {
        TaskKind::from(self.task_type.as_str())
    }

    pub fn body<T: DeserializeOwned>(&self) -> ExecutorResult<T> {
        serde_json::from_value(self.task_body.clone()).map_err(|e| {
            ExecutorError::Serialization(format!(
                "解析任务 {} 的 task_body 失败: {e}",
                self.task_type
            ))
        })
    }

    pub fn to_bytes(&self) -> ExecutorResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> ExecutorResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// 任务类型标签。内置构建类任务是封闭集合, 其余通过注册表扩展
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    BuildFromImage,
    BuildFromSourceCode,
    BuildFromMarketSlug,
    ServiceCheck,
    PluginImageBuild,
    PluginDockerfileBuild,
    ShareSlug,
    ShareImage,
    Warmup,
    Generic(String),
}

pub const BACKUP_APPS_NEW: &str = "backup_apps_new";
pub const BACKUP_APPS_RESTORE: &str = "backup_apps_restore";
pub const DELETE_BACKUP: &str = "delete_backup";
pub const ROLLING_UPGRADE: &str = "rolling_upgrade";

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::BuildFromImage => "build_from_image",
            TaskKind::BuildFromSourceCode => "build_from_source_code",
            TaskKind::BuildFromMarketSlug => "build_from_market_slug",
            TaskKind::ServiceCheck => "service_check",
            TaskKind::PluginImageBuild => "plugin_image_build",
            TaskKind::PluginDockerfileBuild => "plugin_dockerfile_build",
            TaskKind::ShareSlug => "share-slug",
            TaskKind::ShareImage => "share-image",
            TaskKind::Warmup => "warmup",
            TaskKind::Generic(name) => name,
        }
    }

    pub fn generic<S: Into<String>>(name: S) -> Self {
        TaskKind::Generic(name.into())
    }
}

impl From<&str> for TaskKind {
    fn from(value: &str) -> Self {
        match value {
            "build_from_image" => TaskKind::BuildFromImage,
            "build_from_source_code" => TaskKind::BuildFromSourceCode,
            "build_from_market_slug" => TaskKind::BuildFromMarketSlug,
            "service_check" => TaskKind::ServiceCheck,
            "plugin_image_build" => TaskKind::PluginImageBuild,
            "plugin_dockerfile_build" => TaskKind::PluginDockerfileBuild,
            "share-slug" => TaskKind::ShareSlug,
            "share-image" => TaskKind::ShareImage,
            "warmup" => TaskKind::Warmup,
            other => TaskKind::Generic(other.to_string()),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
