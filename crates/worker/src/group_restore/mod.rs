//! 应用组恢复
//!
//! 下载 -> 加载元数据 -> 身份重映射 -> 元数据回放 -> 恢复构建产物和数据 -> 发布结果。
//! 任何一步失败都由 `error_callback` 删除已写入的组件、清理缓存并发布失败结果。

pub mod data;
pub mod remap;
pub mod replay;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use executor_domain::{
    restore_result_key, steps, AppBackup, AppSnapshot, BackupMode, EventLogger, ExecutorError,
    ExecutorResult, RegistryAuth, RestoreResult, RestoreStatus, RestoreTaskBody, ResultExt,
    ServiceChange, StepStatus, TaskMessage, TaskWorker, TransferKind,
};
use executor_infrastructure::archive;
use tracing::{info, warn};

use crate::bundle;
use crate::common::{blocking, publish_json};
use crate::context::WorkerContext;
use data::DataRestore;
use remap::RemapTarget;

const DOWNLOADED_BUNDLE: &str = "bundle.zip";

pub struct GroupRestoreWorker {
    ctx: Arc<WorkerContext>,
    body: RestoreTaskBody,
    logger: Arc<dyn EventLogger>,
    cache_dir: PathBuf,
    /// 备份包解开后的根目录
    bundle_root: PathBuf,
    service_change: BTreeMap<String, ServiceChange>,
}

impl GroupRestoreWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: RestoreTaskBody = task.body()?;
        if body.backup_id.is_empty() || body.tenant_id.is_empty() || body.restore_id.is_empty() {
            return Err(ExecutorError::validation_error(
                "恢复任务缺少 backup_id、tenant_id 或 restore_id",
            ));
        }
        let run_id = if body.event_id.is_empty() {
            uuid::Uuid::new_v4().simple().to_string()
        } else {
            body.event_id.clone()
        };
        let cache_dir = PathBuf::from(&ctx.storage.cache_root)
            .join(&body.backup_id)
            .join(run_id);
        let logger = ctx.logger_for(&body.event_id, task);
        Ok(Self {
            bundle_root: cache_dir.clone(),
            ctx,
            body,
            logger,
            cache_dir,
            service_change: BTreeMap::new(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn service_change(&self) -> &BTreeMap<String, ServiceChange> {
        &self.service_change
    }

    fn progress(&self, message: &str) {
        self.logger.info(message, steps::RESTORE, StepStatus::Running);
    }

    /// 按备份记录的存储类型下载远端备份包
    async fn download_bundle(&self, backup: &AppBackup, downloaded: &Path) -> ExecutorResult<()> {
        if backup.storage_kind() == TransferKind::S3 {
            let (target, key) = self
                .ctx
                .s3_location(self.body.s3_config.as_ref(), &backup.source_dir)?;
            let transfer = self.ctx.transfers.s3(&target)?;
            transfer
                .download_file(&key, downloaded, self.logger.clone())
                .await
                .context("从对象存储下载备份包失败")?;
        } else {
            let transfer = self.ctx.transfers.sftp(&self.body.slug_info.sftp_target()?)?;
            transfer
                .download_file(&backup.source_dir, downloaded, self.logger.clone())
                .await
                .context("从 SFTP 下载备份包失败")?;
        }
        Ok(())
    }

    async fn fetch_bundle(&self, backup: &AppBackup) -> ExecutorResult<PathBuf> {
        if self.cache_dir.exists() {
            tokio::fs::remove_dir_all(&self.cache_dir).await?;
        }
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        match backup.storage_kind() {
            TransferKind::Sftp | TransferKind::S3 => {
                let downloaded = self.cache_dir.join(DOWNLOADED_BUNDLE);
                self.download_bundle(backup, &downloaded).await?;
                let cache_dir = self.cache_dir.clone();
                blocking(move || {
                    archive::unzip(&downloaded, &cache_dir)?;
                    std::fs::remove_file(&downloaded)?;
                    Ok(())
                })
                .await?;
            }
            TransferKind::Local => {
                let source = PathBuf::from(&backup.source_dir);
                let cache_dir = self.cache_dir.clone();
                blocking(move || {
                    let meta = std::fs::metadata(&source)?;
                    if meta.is_dir() {
                        archive::copy_dir_all(&source, &cache_dir)
                    } else if source.extension().is_some_and(|ext| ext == "zip") {
                        archive::unzip(&source, &cache_dir)
                    } else {
                        Err(ExecutorError::validation_error(format!(
                            "无法识别的备份包 {}",
                            source.display()
                        )))
                    }
                })
                .await
                .with_context(|| format!("读取本地备份包 {} 失败", backup.source_dir))?;
            }
        }

        if self.cache_dir.join(bundle::METADATA_FILE).exists() {
            return Ok(self.cache_dir.clone());
        }
        let cache_dir = self.cache_dir.clone();
        let nested = blocking(move || Ok(archive::single_top_level_dir(&cache_dir)?)).await?;
        match nested {
            Some(dir) if dir.join(bundle::METADATA_FILE).exists() => Ok(dir),
            _ => Err(ExecutorError::validation_error(format!(
                "备份包中没有 {}",
                bundle::METADATA_FILE
            ))),
        }
    }

    fn data_restore<'a>(
        &'a self,
        backup: &'a AppBackup,
        mode: BackupMode,
    ) -> ExecutorResult<DataRestore<'a>> {
        let online = mode == BackupMode::FullOnline;
        // 只有推送到 SFTP 的备份才单独存放 slug
        let sftp = if backup.storage_kind() == TransferKind::Sftp {
            Some(self.ctx.transfers.sftp(&self.body.slug_info.sftp_target()?)?)
        } else {
            None
        };
        let image_info = &self.body.image_info;
        let hub = (online && image_info.is_configured()).then(|| {
            (
                image_info.hub_url.as_str(),
                image_info.namespace.as_str(),
                RegistryAuth::optional(&image_info.hub_user, &image_info.hub_password),
            )
        });
        Ok(DataRestore {
            ctx: &self.ctx,
            logger: self.logger.clone(),
            bundle_root: &self.bundle_root,
            sftp,
            slug_namespace: &self.body.slug_info.namespace,
            group_id: &backup.group_id,
            version: &backup.version,
            hub,
        })
    }

    fn result(&self, status: RestoreStatus, message: String) -> RestoreResult {
        RestoreResult {
            status,
            message,
            create_time: Utc::now(),
            service_change: self.service_change.clone(),
            backup_id: self.body.backup_id.clone(),
            restore_mode: self.body.restore_mode.clone(),
            event_id: self.body.event_id.clone(),
            restore_id: self.body.restore_id.clone(),
            cache_dir: self.bundle_root.to_string_lossy().into_owned(),
        }
    }

    /// 只保留控制台需要的元数据文件
    async fn prune_cache(&self) -> ExecutorResult<()> {
        let console = self.bundle_root.join(bundle::CONSOLE_METADATA_FILE);
        let kept = tokio::fs::read(&console).await.ok();
        tokio::fs::remove_dir_all(&self.cache_dir).await?;
        if let Some(content) = kept {
            tokio::fs::create_dir_all(&self.bundle_root).await?;
            tokio::fs::write(&console, content).await?;
        }
        Ok(())
    }

    async fn rollback(&self) {
        for (old_id, change) in &self.service_change {
            if let Err(e) = self.ctx.services.delete_service_cascade(&change.service_id).await {
                warn!(old_id = %old_id, new_id = %change.service_id, "删除已恢复的组件失败: {e}");
            }
        }
        if self.cache_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.cache_dir).await {
                warn!(path = %self.cache_dir.display(), "清理恢复缓存失败: {e}");
            }
        }
    }
}

#[async_trait]
impl TaskWorker for GroupRestoreWorker {
    fn name(&self) -> &str {
        "group_restore"
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        self.logger.info("开始恢复应用组", steps::RESTORE, StepStatus::Starting);

        let backup = self
            .ctx
            .backups
            .get(&self.body.backup_id)
            .await?
            .ok_or_else(|| ExecutorError::not_found("region_app_backup", &self.body.backup_id))?;
        backup.ensure_restorable()?;
        let mode = backup
            .mode()
            .ok_or_else(|| ExecutorError::validation_error("无效的备份模式"))?;

        self.bundle_root = self.fetch_bundle(&backup).await?;
        self.progress("备份包下载完成");

        let metadata_path = self.bundle_root.join(bundle::METADATA_FILE);
        let data = tokio::fs::read_to_string(&metadata_path).await?;
        let mut snapshot = AppSnapshot::from_metadata(&data)?;

        let target = RemapTarget {
            tenant_id: self.body.tenant_id.clone(),
            registry_domain: self.ctx.registry.domain.clone(),
            slug_root: self.ctx.storage.slug_root.clone(),
        };
        let changes = remap::remap(&mut snapshot, &target)?;
        let new_to_old: BTreeMap<String, String> = changes
            .iter()
            .map(|(old, change)| (change.service_id.clone(), old.clone()))
            .collect();
        self.service_change = changes;

        let volume_ids = replay::replay(
            self.ctx.services.as_ref(),
            &mut snapshot,
            &self.ctx.storage,
            &mut self.service_change,
        )
        .await?;
        self.progress("组件元数据恢复完成");

        let restore = self.data_restore(&backup, mode)?;
        for service in &snapshot.services {
            let old_id = new_to_old
                .get(&service.service_id)
                .map(String::as_str)
                .unwrap_or_default();
            restore.restore_artifacts(service, old_id).await?;
            restore.restore_volumes(service, old_id, &volume_ids).await?;
            self.progress(&format!("组件 {} 数据恢复完成", service.service.service_alias));
        }
        restore.restore_plugin_images(&snapshot).await?;
        drop(restore);

        let result = self.result(RestoreStatus::Success, "success".to_string());
        publish_json(
            self.ctx.results.as_ref(),
            &restore_result_key(&self.body.restore_id),
            &result,
        )
        .await?;

        if let Err(e) = self.prune_cache().await {
            warn!(path = %self.cache_dir.display(), "清理恢复缓存失败: {e}");
        }
        info!(
            restore_id = %self.body.restore_id,
            services = self.service_change.len(),
            "应用组恢复完成"
        );
        self.logger.info("恢复成功", steps::RESTORE, StepStatus::Success);
        Ok(())
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        self.logger.error(
            &format!("恢复失败: {err}"),
            steps::CALLBACK,
            StepStatus::Failure,
        );
        self.rollback().await;

        let result = self.result(RestoreStatus::Failed, err.to_string());
        if let Err(e) = publish_json(
            self.ctx.results.as_ref(),
            &restore_result_key(&self.body.restore_id),
            &result,
        )
        .await
        {
            warn!(restore_id = %self.body.restore_id, "发布恢复结果失败: {e}");
        }
    }
}
