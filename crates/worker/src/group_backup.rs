//! 应用组备份
//!
//! 读取控制台预先写好的 `region_apps_metadata.json`, 逐个组件采集当前部署版本的
//! 构建产物和持久化数据, 最后按模式把整个备份包留在本地、推送到 SFTP 或上传到对象存储。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use executor_domain::{
    steps, AppBackup, AppSnapshot, BackupMode, BackupStatus, BackupTaskBody, EventLogger,
    ExecutorError, ExecutorResult, RegionServiceSnapshot, RegistryAuth, ResultExt, StepStatus,
    TaskMessage, TaskWorker, Transfer, VolumeType, DELIVERED_IMAGE, DELIVERED_SLUG,
    FINAL_STATUS_LOST, SOURCE_TYPE_LOCAL, SOURCE_TYPE_S3, SOURCE_TYPE_SFTP,
};
use executor_infrastructure::archive;
use tracing::{debug, info, warn};

use crate::bundle;
use crate::common::{blocking, dir_size};
use crate::context::WorkerContext;

/// 备份包的去向
enum BundleStore {
    Local,
    /// slug 逐个上传, 备份包随后推送到同一目录
    Sftp(Arc<dyn Transfer>),
    /// slug 留在备份包里一起上传
    S3 {
        transfer: Arc<dyn Transfer>,
        bucket: String,
    },
}

impl BundleStore {
    fn sftp(&self) -> Option<&Arc<dyn Transfer>> {
        match self {
            BundleStore::Sftp(transfer) => Some(transfer),
            _ => None,
        }
    }
}

pub struct GroupBackupWorker {
    ctx: Arc<WorkerContext>,
    body: BackupTaskBody,
    logger: Arc<dyn EventLogger>,
}

impl GroupBackupWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: BackupTaskBody = task.body()?;
        if body.backup_id.is_empty() || body.group_id.is_empty() || body.source_dir.is_empty() {
            return Err(ExecutorError::validation_error(
                "备份任务缺少 backup_id、group_id 或 source_dir",
            ));
        }
        let logger = ctx.logger_for(&body.event_id, task);
        Ok(Self { ctx, body, logger })
    }

    fn online(&self) -> bool {
        self.body.mode == BackupMode::FullOnline
    }

    fn hub_auth(&self) -> Option<RegistryAuth> {
        RegistryAuth::optional(&self.body.image_info.hub_user, &self.body.image_info.hub_password)
    }

    /// 在线模式优先使用 SFTP, 其次对象存储; 都没有配置时备份包留在本地
    fn bundle_store(&self) -> ExecutorResult<BundleStore> {
        if !self.online() {
            return Ok(BundleStore::Local);
        }
        if self.body.slug_info.is_configured() {
            let transfer = self.ctx.transfers.sftp(&self.body.slug_info.sftp_target()?)?;
            return Ok(BundleStore::Sftp(transfer));
        }
        if let Some(target) = self.ctx.s3_target(self.body.s3_config.as_ref()) {
            let bucket = target.bucket.clone();
            let transfer = self.ctx.transfers.s3(&target)?;
            return Ok(BundleStore::S3 { transfer, bucket });
        }
        warn!(backup_id = %self.body.backup_id, "在线备份没有配置 SFTP 或对象存储, 备份包保留在本地");
        Ok(BundleStore::Local)
    }

    /// 控制台通常已经创建了备份记录, 没有时补建一条
    async fn load_record(&self) -> ExecutorResult<AppBackup> {
        if let Some(backup) = self.ctx.backups.get(&self.body.backup_id).await? {
            return Ok(backup);
        }
        let mut backup = AppBackup::new(&self.body.backup_id, &self.body.group_id);
        backup.event_id = self.body.event_id.clone();
        backup.version = self.body.version.clone();
        backup.backup_mode = self.body.mode.as_str().to_string();
        backup.source_dir = self.body.source_dir.clone();
        self.ctx.backups.create(&backup).await?;
        Ok(backup)
    }

    async fn backup_artifact(
        &self,
        root: &Path,
        service: &mut RegionServiceSnapshot,
        sftp: Option<&Arc<dyn Transfer>>,
    ) -> ExecutorResult<u64> {
        let service_id = service.service_id.clone();
        let Some(version) = service.deployed_version_mut() else {
            warn!(service_id = %service_id, "组件没有与部署版本对应的构建记录, 跳过构建产物");
            return Ok(0);
        };

        match version.delivered_type.as_str() {
            DELIVERED_SLUG => {
                let local = PathBuf::from(&version.delivered_path);
                if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
                    self.logger.error(
                        &format!("组件 {service_id} 的 slug 文件 {} 不存在", local.display()),
                        steps::BACKUP,
                        StepStatus::Running,
                    );
                    version.final_status = FINAL_STATUS_LOST.to_string();
                    return Ok(0);
                }

                if let Some(sftp) = sftp {
                    let remote = bundle::remote_slug_path(
                        &self.body.slug_info.namespace,
                        &self.body.group_id,
                        &self.body.version,
                        &service_id,
                        &version.build_version,
                    );
                    let size = sftp
                        .push_file(&local, &remote, self.logger.clone())
                        .await
                        .with_context(|| format!("上传组件 {service_id} 的 slug 失败"))?;
                    return Ok(size);
                }

                let target = bundle::slug_file(root, &service_id, &version.build_version);
                self.ctx
                    .transfers
                    .local()
                    .push_file(&local, &target.to_string_lossy(), self.logger.clone())
                    .await
                    .with_context(|| format!("复制组件 {service_id} 的 slug 失败"))?;
                Ok(0)
            }
            DELIVERED_IMAGE => {
                let image = version.delivered_path.clone();
                let registry_auth = self.ctx.registry_auth();

                let found = match self.ctx.images.exists(&image, registry_auth.as_ref()).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(image = %image, "查询镜像失败: {e}");
                        false
                    }
                };
                if !found {
                    self.logger.error(
                        &format!("组件 {service_id} 的镜像 {image} 不存在"),
                        steps::BACKUP,
                        StepStatus::Running,
                    );
                    version.final_status = FINAL_STATUS_LOST.to_string();
                    return Ok(0);
                }

                if self.online() && self.body.image_info.is_configured() {
                    let backup_image = bundle::backup_image_name(
                        &self.body.image_info.hub_url,
                        &self.body.image_info.namespace,
                        &service_id,
                        &version.build_version,
                    );
                    self.ctx
                        .images
                        .pull(&image, registry_auth.as_ref(), self.logger.clone())
                        .await
                        .with_context(|| format!("拉取组件 {service_id} 的镜像失败"))?;
                    self.ctx.images.tag(&image, &backup_image).await?;
                    let hub_auth = self.hub_auth();
                    let pushed = if self.body.image_info.is_trust {
                        self.ctx
                            .images
                            .trusted_push(&backup_image, hub_auth.as_ref(), self.logger.clone())
                            .await
                    } else {
                        self.ctx
                            .images
                            .push(&backup_image, hub_auth.as_ref(), self.logger.clone())
                            .await
                    };
                    pushed.with_context(|| format!("推送备份镜像 {backup_image} 失败"))?;
                    return Ok(0);
                }

                // 本地可能已经有该镜像, 拉取失败不影响导出
                if let Err(e) = self
                    .ctx
                    .images
                    .pull(&image, registry_auth.as_ref(), self.logger.clone())
                    .await
                {
                    warn!(image = %image, "拉取镜像失败, 尝试直接导出: {e}");
                }
                let target = bundle::image_file(root, &service_id, &version.build_version);
                self.ctx
                    .images
                    .save(&image, &target, self.logger.clone())
                    .await
                    .with_context(|| format!("导出组件 {service_id} 的镜像失败"))?;
                Ok(0)
            }
            other => {
                warn!(service_id = %service_id, delivered_type = other, "未知的交付类型");
                Ok(0)
            }
        }
    }

    async fn backup_volumes(&self, root: &Path, service: &RegionServiceSnapshot) -> ExecutorResult<()> {
        if !service.volumes.is_empty() {
            self.backup_all_data(root, service).await?;
        }

        for volume in &service.volumes {
            if volume.host_path.is_empty() {
                continue;
            }
            if matches!(
                VolumeType::parse(&volume.volume_type),
                Some(VolumeType::MemoryFs | VolumeType::ConfigFile)
            ) {
                continue;
            }
            let source = PathBuf::from(&volume.host_path);
            match archive::dir_is_empty(&source) {
                Ok(false) => {}
                Ok(true) => {
                    debug!(host_path = %volume.host_path, "存储卷目录为空, 跳过");
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(host_path = %volume.host_path, "存储卷目录不存在, 跳过");
                    continue;
                }
                Err(e) => {
                    warn!(host_path = %volume.host_path, "存储卷目录不可读, 跳过: {e}");
                    continue;
                }
            }

            let target = bundle::volume_archive(root, &service.service_id, &volume.volume_name);
            let entries = blocking(move || archive::zip_dir(&source, &target))
                .await
                .with_context(|| {
                    format!(
                        "打包组件 {} 的存储卷 {} 失败",
                        service.service_id, volume.volume_name
                    )
                })?;
            info!(
                service_id = %service.service_id,
                volume = %volume.volume_name,
                entries,
                "存储卷已打包"
            );
        }
        Ok(())
    }

    /// 组件在共享存储下的目录整体打包, 恢复时优先使用
    async fn backup_all_data(&self, root: &Path, service: &RegionServiceSnapshot) -> ExecutorResult<()> {
        let source = PathBuf::from(&self.ctx.storage.share_data_path)
            .join("tenant")
            .join(&service.service.tenant_id)
            .join("service")
            .join(&service.service_id);
        if !matches!(archive::dir_is_empty(&source), Ok(false)) {
            return Ok(());
        }
        let target = bundle::all_data_archive(root, &service.service_id);
        let entries = blocking(move || archive::zip_dir(&source, &target))
            .await
            .with_context(|| format!("打包组件 {} 的全部数据失败", service.service_id))?;
        info!(service_id = %service.service_id, entries, "组件数据已整体打包");
        Ok(())
    }

    async fn backup_plugin_images(&self, root: &Path, snapshot: &AppSnapshot) -> ExecutorResult<()> {
        let auth = self.ctx.registry_auth();
        for version in &snapshot.plugin_build_versions {
            if version.build_local_image.is_empty() {
                continue;
            }
            if let Err(e) = self
                .ctx
                .images
                .pull(&version.build_local_image, auth.as_ref(), self.logger.clone())
                .await
            {
                warn!(image = %version.build_local_image, "拉取插件镜像失败, 尝试直接导出: {e}");
            }
            let target = bundle::plugin_image_file(root, &version.plugin_id, &version.deploy_version);
            self.ctx
                .images
                .save(&version.build_local_image, &target, self.logger.clone())
                .await
                .with_context(|| format!("导出插件 {} 的镜像失败", version.plugin_id))?;
        }
        Ok(())
    }

    /// 把整个备份包打成 zip 推送到远端, 返回远端 key 和字节数
    async fn push_bundle(&self, root: &Path, transfer: &Arc<dyn Transfer>) -> ExecutorResult<(String, u64)> {
        let zip_path = PathBuf::from(format!("{}.zip", root.to_string_lossy().trim_end_matches('/')));
        let source = root.to_path_buf();
        let target = zip_path.clone();
        blocking(move || archive::zip_dir(&source, &target))
            .await
            .context("打包备份目录失败")?;

        let remote = bundle::remote_bundle_path(
            &self.body.slug_info.namespace,
            &self.body.group_id,
            &self.body.version,
        );
        let pushed = transfer
            .push_file(&zip_path, &remote, self.logger.clone())
            .await
            .context("上传备份包失败");
        if let Err(e) = tokio::fs::remove_file(&zip_path).await {
            warn!(path = %zip_path.display(), "删除本地备份包失败: {e}");
        }
        Ok((remote, pushed?))
    }
}

#[async_trait]
impl TaskWorker for GroupBackupWorker {
    fn name(&self) -> &str {
        "group_backup"
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        self.logger.info("开始备份应用组", steps::BACKUP, StepStatus::Starting);
        let mut backup = self.load_record().await?;

        let root = PathBuf::from(&self.body.source_dir);
        let metadata_path = root.join(bundle::METADATA_FILE);
        let data = tokio::fs::read_to_string(&metadata_path)
            .await
            .with_context(|| format!("读取元数据文件 {} 失败", metadata_path.display()))?;
        let mut snapshot = AppSnapshot::from_metadata(&data)?;

        let store = self.bundle_store()?;

        let mut size = 0u64;
        for service in snapshot.services.iter_mut() {
            if !self.body.includes(&service.service_id) {
                continue;
            }
            size += self.backup_artifact(&root, service, store.sftp()).await?;
            self.backup_volumes(&root, service).await?;
            self.logger.info(
                &format!("组件 {} 备份完成", service.service.service_alias),
                steps::BACKUP,
                StepStatus::Running,
            );
        }
        self.backup_plugin_images(&root, &snapshot).await?;

        // 写回 lost 标记, 恢复时据此跳过
        tokio::fs::write(&metadata_path, snapshot.to_metadata()?).await?;

        match &store {
            BundleStore::Sftp(sftp) => {
                let (remote, pushed) = self.push_bundle(&root, sftp).await?;
                size += pushed;
                backup.source_type = SOURCE_TYPE_SFTP.to_string();
                backup.source_dir = remote;
            }
            BundleStore::S3 { transfer, bucket } => {
                let (key, pushed) = self.push_bundle(&root, transfer).await?;
                size += pushed;
                backup.source_type = SOURCE_TYPE_S3.to_string();
                backup.source_dir = bundle::s3_location(bucket, &key);
            }
            BundleStore::Local => {
                let dir = root.clone();
                size = blocking(move || dir_size(&dir)).await?;
                backup.source_type = SOURCE_TYPE_LOCAL.to_string();
                backup.source_dir = self.body.source_dir.clone();
            }
        }

        backup.status = BackupStatus::Success;
        backup.backup_size = i64::try_from(size).unwrap_or(i64::MAX);
        backup.backup_mode = self.body.mode.as_str().to_string();
        backup.version = self.body.version.clone();
        self.ctx.backups.update(&backup).await?;

        info!(backup_id = %backup.backup_id, size, "应用组备份完成");
        self.logger.info("备份成功", steps::BACKUP, StepStatus::Success);
        Ok(())
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        self.logger.error(
            &format!("备份失败: {err}"),
            steps::CALLBACK,
            StepStatus::Failure,
        );
        match self.ctx.backups.get(&self.body.backup_id).await {
            Ok(Some(mut backup)) => {
                backup.status = BackupStatus::Failed;
                if let Err(e) = self.ctx.backups.update(&backup).await {
                    warn!(backup_id = %self.body.backup_id, "更新备份状态失败: {e}");
                }
            }
            Ok(None) => warn!(backup_id = %self.body.backup_id, "备份记录不存在"),
            Err(e) => warn!(backup_id = %self.body.backup_id, "读取备份记录失败: {e}"),
        }
    }
}
