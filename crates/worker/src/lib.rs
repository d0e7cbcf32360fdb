//! 各类任务的 worker 实现
//!
//! 每个 worker 从任务消息构造, 通过 [`WorkerContext`] 访问存储、镜像仓库和传输通道。
//! [`register_all`] 把全部 worker 和对应的重试策略登记到分发器。

pub mod bundle;
pub mod common;
pub mod context;
pub mod delete_backup;
pub mod group_backup;
pub mod group_restore;
pub mod image_build;
pub mod market_slug;
pub mod plugin_build;
pub mod service_check;
pub mod share;
pub mod source_build;

use std::sync::Arc;

use executor_config::DispatcherConfig;
use executor_dispatcher::{RetryPolicy, WorkerRegistry};
use executor_domain::{
    TaskKind, TaskMessage, TaskWorker, BACKUP_APPS_NEW, BACKUP_APPS_RESTORE, DELETE_BACKUP,
};
use tracing::info;

pub use context::{Collaborators, Repositories, WorkerContext};
pub use delete_backup::BackupDeleteWorker;
pub use group_backup::GroupBackupWorker;
pub use group_restore::GroupRestoreWorker;
pub use image_build::ImageBuildWorker;
pub use market_slug::MarketSlugWorker;
pub use plugin_build::{PluginBuildWorker, PluginSource};
pub use service_check::ServiceCheckWorker;
pub use share::{ShareImageWorker, ShareSlugWorker};
pub use source_build::SourceBuildWorker;

macro_rules! boxed {
    ($ctx:expr, $ctor:expr) => {{
        let ctx = $ctx.clone();
        move |task: &TaskMessage| -> executor_domain::ExecutorResult<Box<dyn TaskWorker>> {
            Ok(Box::new($ctor(ctx.clone(), task)?))
        }
    }};
}

/// 注册全部内置 worker
pub fn register_all(registry: &mut WorkerRegistry, ctx: Arc<WorkerContext>, cfg: &DispatcherConfig) {
    let retry = RetryPolicy::build_with_retry(cfg);
    let once = RetryPolicy::build_once(cfg);
    let generic = RetryPolicy::generic(cfg);

    registry
        .register(TaskKind::BuildFromImage, retry, boxed!(ctx, ImageBuildWorker::new))
        .register(TaskKind::BuildFromMarketSlug, retry, boxed!(ctx, MarketSlugWorker::new))
        .register(TaskKind::ShareSlug, retry, boxed!(ctx, ShareSlugWorker::new))
        .register(TaskKind::ShareImage, retry, boxed!(ctx, ShareImageWorker::new))
        .register(TaskKind::BuildFromSourceCode, once, boxed!(ctx, SourceBuildWorker::new))
        .register(TaskKind::ServiceCheck, once, boxed!(ctx, ServiceCheckWorker::new))
        .register(
            TaskKind::PluginImageBuild,
            once,
            boxed!(ctx, |ctx, task| PluginBuildWorker::new(ctx, task, PluginSource::Image)),
        )
        .register(
            TaskKind::PluginDockerfileBuild,
            once,
            boxed!(ctx, |ctx, task| PluginBuildWorker::new(ctx, task, PluginSource::Dockerfile)),
        )
        .register(
            TaskKind::generic(BACKUP_APPS_NEW),
            generic,
            boxed!(ctx, GroupBackupWorker::new),
        )
        .register(
            TaskKind::generic(BACKUP_APPS_RESTORE),
            generic,
            boxed!(ctx, GroupRestoreWorker::new),
        )
        .register(
            TaskKind::generic(DELETE_BACKUP),
            generic,
            boxed!(ctx, BackupDeleteWorker::new),
        );

    let kinds: Vec<&str> = registry.kinds().map(TaskKind::as_str).collect();
    info!(workers = registry.len(), kinds = ?kinds, "worker 注册完成");
}
