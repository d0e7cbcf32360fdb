use std::path::Path;
use std::sync::Arc;

use executor_domain::{
    steps, BuildAction, EventLogger, ExecutorError, ExecutorResult, ResultStore,
    RollingUpgradeBody, StepStatus, TaskMessage, VersionInfo, ROLLING_UPGRADE,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::context::WorkerContext;

/// 在阻塞线程池上执行同步的文件操作
pub async fn blocking<F, T>(f: F) -> ExecutorResult<T>
where
    F: FnOnce() -> ExecutorResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExecutorError::Internal(format!("阻塞任务异常退出: {e}")))?
}

pub fn now_string() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub async fn publish_json<T: Serialize>(
    results: &dyn ResultStore,
    key: &str,
    value: &T,
) -> ExecutorResult<()> {
    let data = serde_json::to_string(value)?;
    results.put(key, &data).await?;
    debug!(key, "发布结果");
    Ok(())
}

/// 目录下所有文件的总字节数
pub fn dir_size(path: &Path) -> ExecutorResult<u64> {
    let meta = std::fs::metadata(path)?;
    if meta.is_file() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        total += dir_size(&entry?.path())?;
    }
    Ok(total)
}

/// 任务体没有 event_id 时用 task_id 代替
pub fn event_id_or_task(event_id: &str, task: &TaskMessage) -> String {
    if event_id.is_empty() {
        task.task_id.clone()
    } else {
        event_id.to_string()
    }
}

/// 按 event_id 更新构建版本记录, 不存在时新建
pub async fn update_version<F>(
    ctx: &WorkerContext,
    event_id: &str,
    service_id: &str,
    build_version: &str,
    kind: &str,
    apply: F,
) -> ExecutorResult<()>
where
    F: FnOnce(&mut VersionInfo) + Send,
{
    let mut version = match ctx.versions.get_by_event_id(event_id).await? {
        Some(version) => version,
        None => VersionInfo {
            event_id: event_id.to_string(),
            service_id: service_id.to_string(),
            build_version: build_version.to_string(),
            kind: kind.to_string(),
            ..Default::default()
        },
    };
    apply(&mut version);
    version.finish_time = now_string();
    ctx.versions.upsert(&version).await
}

/// 构建成功后的收尾: 更新部署版本, 需要时投递滚动升级任务
pub async fn send_action(
    ctx: &WorkerContext,
    logger: &Arc<dyn EventLogger>,
    tenant_id: &str,
    service_id: &str,
    deploy_version: &str,
    event_id: &str,
    action: &BuildAction,
) -> ExecutorResult<()> {
    ctx.services
        .update_deploy_version(service_id, deploy_version)
        .await?;
    logger.info("Build success", steps::LAST, StepStatus::Success);

    if action.action == "upgrade" {
        let body = RollingUpgradeBody {
            tenant_id: tenant_id.to_string(),
            service_id: service_id.to_string(),
            new_deploy_version: deploy_version.to_string(),
            event_id: event_id.to_string(),
            configs: action.configs.clone(),
        };
        let task = TaskMessage::new(ROLLING_UPGRADE, serde_json::to_value(&body)?);
        ctx.queue.publish(&ctx.worker_topic, &task).await?;
        info!(service_id, deploy_version, "已投递滚动升级任务");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/one"), b"12345").unwrap();
        std::fs::write(dir.path().join("a/b/two"), b"123").unwrap();
        assert_eq!(dir_size(dir.path()).unwrap(), 8);
        assert_eq!(dir_size(&dir.path().join("a/one")).unwrap(), 5);
    }
}
