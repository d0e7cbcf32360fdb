//! 构建产物与持久化数据的恢复

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use executor_domain::{
    AppSnapshot, EventLogger, ExecutorError, ExecutorResult, ImageName, RegionServiceSnapshot,
    RegistryAuth, ResultExt, Transfer, VersionInfo, VolumeType, DELIVERED_IMAGE, DELIVERED_SLUG,
};
use executor_infrastructure::archive;
use tracing::{debug, info, warn};

use crate::bundle;
use crate::common::blocking;
use crate::context::WorkerContext;

/// 一次恢复中访问备份包和远端存储需要的信息
pub struct DataRestore<'a> {
    pub ctx: &'a WorkerContext,
    pub logger: Arc<dyn EventLogger>,
    pub bundle_root: &'a Path,
    /// slug 单独存放在 SFTP 上时使用, 其余情况 slug 在备份包内
    pub sftp: Option<Arc<dyn Transfer>>,
    pub slug_namespace: &'a str,
    pub group_id: &'a str,
    pub version: &'a str,
    /// 在线备份镜像所在的外部仓库
    pub hub: Option<(&'a str, &'a str, Option<RegistryAuth>)>,
}

impl DataRestore<'_> {
    /// 恢复所有成功交付的构建版本
    ///
    /// 只有当前部署版本会被备份, 历史版本缺少产物时跳过; 其余错误一律中止。
    pub async fn restore_artifacts(&self, service: &RegionServiceSnapshot, old_id: &str) -> ExecutorResult<()> {
        let deployed = service.service.deploy_version.as_str();
        for version in service.versions.iter().filter(|v| v.is_restorable()) {
            let result = self.restore_version(version, old_id).await;
            match result {
                Ok(()) => {}
                Err(e) if version.build_version == deployed => {
                    return Err(e).with_context(|| {
                        format!("恢复组件 {} 的构建产物失败", service.service.service_alias)
                    });
                }
                Err(e) if is_missing_artifact(&e) => {
                    debug!(
                        service_id = %service.service_id,
                        build_version = %version.build_version,
                        "历史版本没有可恢复的构建产物: {e}"
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "恢复组件 {} 的版本 {} 失败",
                            service.service.service_alias, version.build_version
                        )
                    });
                }
            }
        }
        Ok(())
    }

    async fn restore_version(&self, version: &VersionInfo, old_id: &str) -> ExecutorResult<()> {
        match version.delivered_type.as_str() {
            DELIVERED_SLUG => self.restore_slug(version, old_id).await,
            DELIVERED_IMAGE => self.restore_image(version, old_id).await,
            _ => Ok(()),
        }
    }

    async fn restore_slug(&self, version: &VersionInfo, old_id: &str) -> ExecutorResult<()> {
        let target = PathBuf::from(&version.delivered_path);
        if let Some(sftp) = &self.sftp {
            let remote = bundle::remote_slug_path(
                self.slug_namespace,
                self.group_id,
                self.version,
                old_id,
                &version.build_version,
            );
            if !sftp.exists(&remote).await? {
                return Err(ExecutorError::not_found("slug", remote));
            }
            sftp.download_file(&remote, &target, self.logger.clone()).await?;
        } else {
            let source = bundle::slug_file(self.bundle_root, old_id, &version.build_version);
            if !source.exists() {
                return Err(ExecutorError::not_found("slug", source.display().to_string()));
            }
            self.ctx
                .transfers
                .local()
                .push_file(&source, &version.delivered_path, self.logger.clone())
                .await?;
        }
        debug!(path = %version.delivered_path, "slug 已恢复");
        Ok(())
    }

    async fn restore_image(&self, version: &VersionInfo, old_id: &str) -> ExecutorResult<()> {
        let local = version.delivered_path.clone();
        let images = &self.ctx.images;

        let source = match &self.hub {
            Some((hub_url, namespace, auth)) => {
                let name = bundle::backup_image_name(hub_url, namespace, old_id, &version.build_version);
                if !images.exists(&name, auth.as_ref()).await? {
                    return Err(ExecutorError::not_found("image", name));
                }
                images.pull(&name, auth.as_ref(), self.logger.clone()).await?;
                name
            }
            None => {
                let tar = bundle::image_file(self.bundle_root, old_id, &version.build_version);
                if !tar.exists() {
                    return Err(ExecutorError::not_found("image", tar.display().to_string()));
                }
                let loaded = images.load(&tar, self.logger.clone()).await?;
                loaded.into_iter().next().ok_or_else(|| {
                    ExecutorError::image_error(format!("导入 {} 后没有得到镜像", tar.display()))
                })?
            }
        };
        self.place_image(&source, &local).await
    }

    /// 重新打标签并推送到平台仓库, 公共镜像只打标签
    async fn place_image(&self, source: &str, local: &str) -> ExecutorResult<()> {
        if source != local {
            self.ctx.images.tag(source, local).await?;
        }
        let domain = ImageName::parse(local).domain;
        if domain.as_deref() == Some(self.ctx.registry.domain.as_str()) {
            let auth = self.ctx.registry_auth();
            self.ctx
                .images
                .push(local, auth.as_ref(), self.logger.clone())
                .await?;
        }
        Ok(())
    }

    pub async fn restore_plugin_images(&self, snapshot: &AppSnapshot) -> ExecutorResult<()> {
        for version in &snapshot.plugin_build_versions {
            let tar = bundle::plugin_image_file(self.bundle_root, &version.plugin_id, &version.deploy_version);
            if version.build_local_image.is_empty() || !tar.exists() {
                continue;
            }
            let loaded = self.ctx.images.load(&tar, self.logger.clone()).await?;
            let source = loaded
                .into_iter()
                .next()
                .unwrap_or_else(|| version.build_local_image.clone());
            self.place_image(&source, &version.build_local_image)
                .await
                .with_context(|| format!("恢复插件 {} 的镜像失败", version.plugin_id))?;
        }
        Ok(())
    }

    /// 解压存储卷数据并放到新的宿主机路径
    ///
    /// 备份包里有组件的整体数据时, 共享存储卷直接整体恢复, 其余存储卷仍按单卷恢复。
    pub async fn restore_volumes(
        &self,
        service: &RegionServiceSnapshot,
        old_id: &str,
        volume_ids: &HashMap<i64, i64>,
    ) -> ExecutorResult<()> {
        let stateful = service.is_stateful();
        let service_dir = PathBuf::from(&self.ctx.storage.share_data_path)
            .join("tenant")
            .join(&service.service.tenant_id)
            .join("service")
            .join(&service.service_id);
        let all_data = self.restore_all_data(service, old_id, &service_dir, volume_ids).await?;

        for volume in &service.volumes {
            if volume.host_path.is_empty() {
                continue;
            }
            if !VolumeType::parse(&volume.volume_type).is_some_and(|t| t.has_host_data()) {
                continue;
            }

            let host_path = PathBuf::from(&volume.host_path);
            if all_data && host_path.starts_with(&service_dir) {
                blocking(move || {
                    fs::create_dir_all(&host_path)?;
                    archive::chmod(&host_path, 0o777)
                })
                .await?;
                continue;
            }

            let archive_path = bundle::volume_archive(self.bundle_root, old_id, &volume.volume_name);
            let new_volume_id = volume_ids.get(&volume.id).copied().unwrap_or(volume.id);
            let tmp = PathBuf::from(&self.ctx.storage.tmp_root)
                .join(format!("{}_{}", service.service_id, new_volume_id));
            let alias = service.service.service_alias.clone();
            let ids = volume_ids.clone();

            blocking(move || {
                if !archive_path.exists() {
                    // 空存储卷不会被打包
                    fs::create_dir_all(&host_path)?;
                    return archive::chmod(&host_path, 0o777);
                }
                place_volume(&archive_path, &tmp, &host_path, stateful.then_some((alias.as_str(), &ids)))
            })
            .await
            .with_context(|| {
                format!(
                    "恢复组件 {} 的存储卷 {} 失败",
                    service.service.service_alias, volume.volume_name
                )
            })?;
            info!(service_id = %service.service_id, volume = %volume.volume_name, "存储卷数据已恢复");
        }
        Ok(())
    }

    /// 整体数据解压到组件在共享存储下的新目录, 备份包里没有时返回 false
    async fn restore_all_data(
        &self,
        service: &RegionServiceSnapshot,
        old_id: &str,
        service_dir: &Path,
        volume_ids: &HashMap<i64, i64>,
    ) -> ExecutorResult<bool> {
        let archive_path = bundle::all_data_archive(self.bundle_root, old_id);
        if !archive_path.exists() {
            return Ok(false);
        }

        let tmp = PathBuf::from(&self.ctx.storage.tmp_root).join(&service.service_id);
        let target = service_dir.to_path_buf();
        let instance_dirs: Vec<PathBuf> = if service.is_stateful() {
            service
                .volumes
                .iter()
                .filter(|v| VolumeType::parse(&v.volume_type) == Some(VolumeType::ShareFile))
                .map(|v| PathBuf::from(v.volume_path.trim_start_matches('/')))
                .collect()
        } else {
            Vec::new()
        };
        let alias = service.service.service_alias.clone();
        let ids = volume_ids.clone();

        blocking(move || {
            if tmp.exists() {
                fs::remove_dir_all(&tmp)?;
            }
            archive::unzip(&archive_path, &tmp)?;
            let source = archive::single_top_level_dir(&tmp)?.unwrap_or_else(|| tmp.clone());
            for relative in &instance_dirs {
                let dir = source.join(relative);
                if dir.is_dir() {
                    rename_instance_dirs(&dir, &alias, &ids)?;
                }
            }
            archive::rename_or_merge(&source, &target)?;
            if tmp.exists() {
                if let Err(e) = fs::remove_dir_all(&tmp) {
                    warn!(path = %tmp.display(), "清理临时目录失败: {e}");
                }
            }
            archive::chmod(&target, 0o777)
        })
        .await
        .with_context(|| format!("恢复组件 {} 的整体数据失败", service.service.service_alias))?;
        info!(service_id = %service.service_id, "组件整体数据已恢复");
        Ok(true)
    }
}

/// 历史版本的产物没有被备份
fn is_missing_artifact(err: &ExecutorError) -> bool {
    matches!(err.root_cause(), ExecutorError::RecordNotFound { .. }) || archive::is_not_found(err)
}

fn place_volume(
    archive_path: &Path,
    tmp: &Path,
    host_path: &Path,
    stateful: Option<(&str, &HashMap<i64, i64>)>,
) -> ExecutorResult<()> {
    if tmp.exists() {
        fs::remove_dir_all(tmp)?;
    }
    archive::unzip(archive_path, tmp)?;

    // 打包时条目带有原目录名
    let source = archive::single_top_level_dir(tmp)?.unwrap_or_else(|| tmp.to_path_buf());
    if let Some((alias, volume_ids)) = stateful {
        rename_instance_dirs(&source, alias, volume_ids)?;
    }
    archive::rename_or_merge(&source, host_path)?;
    if tmp.exists() {
        if let Err(e) = fs::remove_dir_all(tmp) {
            warn!(path = %tmp.display(), "清理临时目录失败: {e}");
        }
    }
    archive::chmod(host_path, 0o777)
}

/// 有状态组件每个实例一个子目录, 目录名里带有组件别名和存储卷ID
fn rename_instance_dirs(dir: &Path, alias: &str, volume_ids: &HashMap<i64, i64>) -> ExecutorResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(new_name) = instance_dir_name(&name, alias, volume_ids) else {
            continue;
        };
        if new_name == name {
            continue;
        }
        let target = dir.join(&new_name);
        if target.exists() {
            archive::merge_dir(&entry.path(), &target)?;
        } else {
            fs::rename(entry.path(), &target)?;
        }
        archive::chmod(&target, 0o777)?;
    }
    Ok(())
}

/// `{alias}-{index}` 或 `manual{volume_id}-{alias}-{index}`
pub fn instance_dir_name(name: &str, alias: &str, volume_ids: &HashMap<i64, i64>) -> Option<String> {
    if let Some(rest) = name.strip_prefix("manual") {
        let (volume_id, rest) = rest.split_once('-')?;
        let index = rest.rsplit('-').next()?;
        let old_id: i64 = volume_id.parse().ok()?;
        let new_id = volume_ids.get(&old_id).copied().unwrap_or(old_id);
        return Some(format!("manual{new_id}-{alias}-{index}"));
    }
    let (_, index) = name.split_once('-')?;
    Some(format!("{alias}-{index}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_dir_names() {
        let ids = HashMap::from([(3, 17)]);
        assert_eq!(instance_dir_name("grold01-0", "grnew99", &ids).as_deref(), Some("grnew99-0"));
        assert_eq!(
            instance_dir_name("manual3-grold01-1", "grnew99", &ids).as_deref(),
            Some("manual17-grnew99-1")
        );
        assert_eq!(instance_dir_name("plain", "grnew99", &ids), None);
        assert_eq!(instance_dir_name("manualx-a-1", "grnew99", &ids), None);
    }

    #[test]
    fn test_place_volume_renames_stateful_instances() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("grold01-0")).unwrap();
        fs::write(data.join("grold01-0/file"), b"x").unwrap();
        let zip = dir.path().join("data.zip");
        archive::zip_dir(&data, &zip).unwrap();

        let host = dir.path().join("new/host/data");
        let ids = HashMap::new();
        place_volume(&zip, &dir.path().join("tmp"), &host, Some(("grnew99", &ids))).unwrap();

        assert!(host.join("grnew99-0/file").exists());
        assert!(!dir.path().join("tmp").exists());
    }
}
