//! 备份包的目录布局与远端路径

use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "region_apps_metadata.json";
/// 控制台侧的元数据, 恢复成功后保留
pub const CONSOLE_METADATA_FILE: &str = "console_apps_metadata.json";
pub const REMOTE_BUNDLE_FILE: &str = "metadata_data.zip";
const ALL_DATA: &str = "__all_data";

pub fn slug_file(root: &Path, service_id: &str, build_version: &str) -> PathBuf {
    root.join(format!("app_{service_id}"))
        .join(format!("slug_{build_version}.tgz"))
}

pub fn image_file(root: &Path, service_id: &str, build_version: &str) -> PathBuf {
    root.join(format!("app_{service_id}"))
        .join(format!("image_{build_version}.tar"))
}

pub fn plugin_image_file(root: &Path, plugin_id: &str, deploy_version: &str) -> PathBuf {
    root.join(format!("plugin_{plugin_id}"))
        .join(format!("image_{deploy_version}.tar"))
}

/// 存储卷名中的 '/' 会破坏目录结构
pub fn volume_archive(root: &Path, service_id: &str, volume_name: &str) -> PathBuf {
    root.join(format!("data_{service_id}"))
        .join(format!("{}.zip", volume_name.replace('/', "")))
}

/// 组件在共享存储下的整体数据
pub fn all_data_archive(root: &Path, service_id: &str) -> PathBuf {
    root.join(format!("data_{service_id}")).join(format!("{ALL_DATA}.zip"))
}

pub fn remote_backup_dir(namespace: &str, group_id: &str, version: &str) -> String {
    if namespace.is_empty() {
        format!("backup/{group_id}_{version}")
    } else {
        format!("{namespace}/backup/{group_id}_{version}")
    }
}

pub fn remote_slug_path(
    namespace: &str,
    group_id: &str,
    version: &str,
    service_id: &str,
    build_version: &str,
) -> String {
    format!(
        "{}/app_{service_id}/{build_version}.tgz",
        remote_backup_dir(namespace, group_id, version)
    )
}

pub fn remote_bundle_path(namespace: &str, group_id: &str, version: &str) -> String {
    format!(
        "{}/{REMOTE_BUNDLE_FILE}",
        remote_backup_dir(namespace, group_id, version)
    )
}

/// SFTP 备份包所在目录, 同目录下还有各组件的 slug
pub fn remote_dir_of_bundle(bundle_path: &str) -> Option<&str> {
    bundle_path
        .strip_suffix(REMOTE_BUNDLE_FILE)
        .and_then(|dir| dir.strip_suffix('/'))
        .filter(|dir| dir.rsplit('/').nth(1) == Some("backup"))
}

pub fn s3_location(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{}", key.trim_start_matches('/'))
}

/// 在线备份推送到外部仓库时使用的镜像名
pub fn backup_image_name(hub_url: &str, namespace: &str, service_id: &str, build_version: &str) -> String {
    let hub = hub_url.trim_end_matches('/');
    if namespace.is_empty() {
        format!("{hub}/{service_id}:{build_version}")
    } else {
        format!("{hub}/{namespace}/{service_id}:{build_version}")
    }
}

/// slug 在平台上的存放位置
pub fn slug_delivered_path(slug_root: &str, tenant_id: &str, service_id: &str, build_version: &str) -> String {
    format!(
        "{}/{tenant_id}/slug/{service_id}/{build_version}.tgz",
        slug_root.trim_end_matches('/')
    )
}

/// 解析 `s3://bucket/key` 或 `bucket/key`, 无法识别桶名时整体作为 key
pub fn parse_s3_location(location: &str) -> (Option<String>, String) {
    let trimmed = location.strip_prefix("s3://").unwrap_or(location);
    let explicit = location.starts_with("s3://");
    match trimmed.split_once('/') {
        Some((bucket, key)) if explicit || (!bucket.is_empty() && !location.starts_with('/')) => {
            (Some(bucket.to_string()), key.to_string())
        }
        _ => (None, trimmed.trim_start_matches('/').to_string()),
    }
}
