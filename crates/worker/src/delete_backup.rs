use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use executor_domain::{
    steps, AppBackup, DeleteBackupBody, EventLogger, ExecutorError, ExecutorResult, ResultExt,
    StepStatus, TaskMessage, TaskWorker, TransferKind,
};
use tracing::{info, warn};

use crate::bundle;
use crate::context::WorkerContext;

/// 删除备份包并把记录标记为已删除, 重复执行是安全的
pub struct BackupDeleteWorker {
    ctx: Arc<WorkerContext>,
    body: DeleteBackupBody,
    logger: Arc<dyn EventLogger>,
}

impl BackupDeleteWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: DeleteBackupBody = task.body()?;
        if body.backup_id.is_empty() {
            return Err(ExecutorError::validation_error("删除备份任务缺少 backup_id"));
        }
        let logger = ctx.logger_for(&body.event_id, task);
        Ok(Self { ctx, body, logger })
    }

    async fn delete_s3(&self, backup: &AppBackup) -> ExecutorResult<bool> {
        let (target, key) = self
            .ctx
            .s3_location(self.body.s3_config.as_ref(), &backup.source_dir)?;
        let transfer = self.ctx.transfers.s3(&target)?;
        transfer
            .delete(&key)
            .await
            .with_context(|| format!("删除对象存储中的备份 {key} 失败"))
    }

    /// 备份包和各组件的 slug 在同一个远端目录下, 整体删除
    async fn delete_sftp(&self, backup: &AppBackup) -> ExecutorResult<bool> {
        let transfer = self.ctx.transfers.sftp(&self.body.slug_info.sftp_target()?)?;
        let remote = bundle::remote_dir_of_bundle(&backup.source_dir).unwrap_or(&backup.source_dir);
        transfer
            .delete(remote)
            .await
            .with_context(|| format!("删除 SFTP 上的备份 {remote} 失败"))
    }

    async fn delete_local(&self, backup: &AppBackup) -> ExecutorResult<bool> {
        let path = PathBuf::from(&backup.source_dir);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(true)
    }
}

#[async_trait]
impl TaskWorker for BackupDeleteWorker {
    fn name(&self) -> &str {
        "delete_backup"
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        let mut backup = self
            .ctx
            .backups
            .get(&self.body.backup_id)
            .await?
            .ok_or_else(|| ExecutorError::not_found("region_app_backup", &self.body.backup_id))?;

        let removed = match backup.storage_kind() {
            TransferKind::Sftp => self.delete_sftp(&backup).await?,
            TransferKind::S3 => self.delete_s3(&backup).await?,
            TransferKind::Local => self.delete_local(&backup).await?,
        };
        if !removed {
            info!(backup_id = %backup.backup_id, source_dir = %backup.source_dir, "备份包不存在, 视为已删除");
        }

        backup.deleted = true;
        self.ctx.backups.update(&backup).await?;
        self.logger.info("备份已删除", steps::DELETE_BACKUP, StepStatus::Success);
        Ok(())
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        warn!(backup_id = %self.body.backup_id, "删除备份失败: {err}");
        self.logger.error(
            &format!("删除备份失败: {err}"),
            steps::DELETE_BACKUP,
            StepStatus::Failure,
        );
    }
}
