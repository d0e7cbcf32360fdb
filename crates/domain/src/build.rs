//! 构建、分享与检测类任务的消息体

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::backup::{ImageInfo, SlugInfo};
use crate::ports::SftpTarget;

/// 构建成功后执行的动作, upgrade 会触发滚动升级
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildAction {
    pub action: String,
    pub configs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuildBody {
    pub service_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub event_id: String,
    pub deploy_version: String,
    pub image: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(flatten)]
    pub action: BuildAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBuildBody {
    pub service_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub event_id: String,
    pub deploy_version: String,
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(flatten)]
    pub action: BuildAction,
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSlugInfo {
    pub slug_path: String,
    pub ftp_host: String,
    pub ftp_port: u16,
    pub ftp_username: String,
    pub ftp_password: String,
}

impl MarketSlugInfo {
    pub fn sftp_target(&self) -> Option<SftpTarget> {
        if self.ftp_host.is_empty() {
            return None;
        }
        Some(SftpTarget {
            host: self.ftp_host.clone(),
            port: if self.ftp_port == 0 { 22 } else { self.ftp_port },
            user: self.ftp_username.clone(),
            password: self.ftp_password.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSlugBody {
    pub service_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub event_id: String,
    pub deploy_version: String,
    pub slug_info: MarketSlugInfo,
    #[serde(flatten)]
    pub action: BuildAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginBuildBody {
    pub plugin_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub event_id: String,
    pub deploy_version: String,
    /// 镜像插件的源镜像
    #[serde(default)]
    pub image_url: String,
    /// Dockerfile 插件的仓库
    #[serde(default)]
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareSlugBody {
    pub share_id: String,
    #[serde(default)]
    pub event_id: String,
    pub service_id: String,
    pub local_slug_path: String,
    /// 离线分享时的目标路径
    #[serde(default)]
    pub slug_path: String,
    #[serde(default)]
    pub slug_info: SlugInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareImageBody {
    pub share_id: String,
    #[serde(default)]
    pub event_id: String,
    pub service_id: String,
    pub local_image_name: String,
    pub image_name: String,
    #[serde(default)]
    pub image_info: ImageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareResult {
    pub share_id: String,
    pub status: String,
}

pub fn share_result_key(share_id: &str) -> String {
    format!("/rainbond/shareresult/{share_id}")
}

pub const CHECK_SOURCE_IMAGE: &str = "docker-image";
pub const CHECK_SOURCE_CODE: &str = "sourcecode";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCheckBody {
    pub check_uuid: String,
    #[serde(default)]
    pub event_id: String,
    pub tenant_id: String,
    /// docker-image / sourcecode
    pub source_type: String,
    /// 镜像名或仓库地址
    pub source_body: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckErrorInfo {
    pub error_type: String,
    pub error_info: String,
    pub solve_advice: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceCheckResult {
    pub check_status: String,
    pub error_infos: Vec<CheckErrorInfo>,
    pub service_info: serde_json::Value,
}

pub fn service_check_key(check_uuid: &str) -> String {
    format!("/rainbond/servicecheck/{check_uuid}")
}

/// 源码拉取后得到的提交信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub branch: String,
}

/// 投递到 worker 队列的滚动升级任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingUpgradeBody {
    pub tenant_id: String,
    pub service_id: String,
    pub new_deploy_version: String,
    pub event_id: String,
    pub configs: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_action_is_flattened() {
        let body: ImageBuildBody = serde_json::from_value(json!({
            "service_id": "s1",
            "tenant_id": "t1",
            "deploy_version": "20240101",
            "image": "nginx:1.25",
            "action": "upgrade",
            "configs": {"k": "v"}
        }))
        .unwrap();
        assert_eq!(body.action.action, "upgrade");
        assert_eq!(body.action.configs["k"], "v");
    }

    #[test]
    fn test_source_body_defaults() {
        let body: SourceBuildBody = serde_json::from_value(json!({
            "service_id": "s1",
            "tenant_id": "t1",
            "deploy_version": "v",
            "repo_url": "https://git.example.com/app.git"
        }))
        .unwrap();
        assert_eq!(body.branch, "master");
        assert_eq!(body.dockerfile, "Dockerfile");
        assert!(body.action.action.is_empty());
    }

    #[test]
    fn test_market_slug_target() {
        let local = MarketSlugInfo {
            slug_path: "/grdata/app.tgz".into(),
            ..Default::default()
        };
        assert!(local.sftp_target().is_none());

        let remote = MarketSlugInfo {
            ftp_host: "ftp".into(),
            ..Default::default()
        };
        assert_eq!(remote.sftp_target().unwrap().port, 22);
    }

    #[test]
    fn test_result_keys() {
        assert_eq!(share_result_key("s"), "/rainbond/shareresult/s");
        assert_eq!(service_check_key("c"), "/rainbond/servicecheck/c");
    }
}
