use chrono::{DateTime, Utc};
use executor_errors::{ExecutorError, ExecutorResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ports::{S3Target, SftpTarget, TransferKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupMode {
    #[serde(rename = "full-online")]
    FullOnline,
    #[serde(rename = "full-offline")]
    FullOffline,
}

impl BackupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupMode::FullOnline => "full-online",
            BackupMode::FullOffline => "full-offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full-online" => Some(BackupMode::FullOnline),
            "full-offline" => Some(BackupMode::FullOffline),
            _ => None,
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Starting,
    Success,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Starting => "starting",
            BackupStatus::Success => "success",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> ExecutorResult<Self> {
        match value {
            "starting" => Ok(BackupStatus::Starting),
            "success" => Ok(BackupStatus::Success),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(ExecutorError::Serialization(format!(
                "未知的备份状态: {other}"
            ))),
        }
    }
}

pub const SOURCE_TYPE_SFTP: &str = "sftp";
pub const SOURCE_TYPE_LOCAL: &str = "local";
pub const SOURCE_TYPE_S3: &str = "s3";

/// 一个备份包的持久化记录, 只做逻辑删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppBackup {
    pub backup_id: String,
    pub event_id: String,
    pub group_id: String,
    pub status: BackupStatus,
    pub version: String,
    pub source_dir: String,
    /// sftp / s3 / local
    pub source_type: String,
    /// full-online / full-offline
    pub backup_mode: String,
    pub backup_size: i64,
    pub deleted: bool,
    pub create_time: DateTime<Utc>,
}

impl AppBackup {
    pub fn new<B: Into<String>, G: Into<String>>(backup_id: B, group_id: G) -> Self {
        Self {
            backup_id: backup_id.into(),
            event_id: String::new(),
            group_id: group_id.into(),
            status: BackupStatus::Starting,
            version: String::new(),
            source_dir: String::new(),
            source_type: String::new(),
            backup_mode: String::new(),
            backup_size: 0,
            deleted: false,
            create_time: Utc::now(),
        }
    }

    pub fn mode(&self) -> Option<BackupMode> {
        BackupMode::parse(&self.backup_mode)
    }

    /// 备份包所在的存储。失败的备份没有 source_type, 按 source_dir 推断
    pub fn storage_kind(&self) -> TransferKind {
        match self.source_type.as_str() {
            SOURCE_TYPE_SFTP => TransferKind::Sftp,
            SOURCE_TYPE_S3 => TransferKind::S3,
            _ if self.source_dir.starts_with("s3://") => TransferKind::S3,
            _ => TransferKind::Local,
        }
    }

    /// 恢复前置校验: 备份必须成功且记录了存放位置
    pub fn ensure_restorable(&self) -> ExecutorResult<()> {
        if self.deleted {
            return Err(ExecutorError::validation_error(format!(
                "备份 {} 已删除",
                self.backup_id
            )));
        }
        if self.status != BackupStatus::Success {
            return Err(ExecutorError::validation_error(format!(
                "备份 {} 状态为 {}, 不能用于恢复",
                self.backup_id,
                self.status.as_str()
            )));
        }
        if self.source_dir.is_empty() || self.source_type.is_empty() {
            return Err(ExecutorError::validation_error(format!(
                "备份 {} 缺少 source_dir 或 source_type",
                self.backup_id
            )));
        }
        if ![SOURCE_TYPE_SFTP, SOURCE_TYPE_S3, SOURCE_TYPE_LOCAL].contains(&self.source_type.as_str()) {
            return Err(ExecutorError::validation_error(format!(
                "备份 {} 的存储类型 {:?} 无效",
                self.backup_id, self.source_type
            )));
        }
        if self.mode().is_none() {
            return Err(ExecutorError::validation_error(format!(
                "备份 {} 的备份模式 {:?} 无效",
                self.backup_id, self.backup_mode
            )));
        }
        Ok(())
    }
}

/// 兼容字符串或数字形式的端口
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn parse_port(port: &str, default: u16) -> ExecutorResult<u16> {
    if port.trim().is_empty() {
        return Ok(default);
    }
    port.trim()
        .parse::<u16>()
        .map_err(|_| ExecutorError::validation_error(format!("无效的端口: {port}")))
}

/// slug 在线存储位置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlugInfo {
    #[serde(rename = "ftp_namespace")]
    pub namespace: String,
    pub ftp_host: String,
    #[serde(deserialize_with = "string_or_number")]
    pub ftp_port: String,
    pub ftp_username: String,
    pub ftp_password: String,
}

impl SlugInfo {
    pub fn is_configured(&self) -> bool {
        !self.ftp_host.is_empty()
    }

    pub fn sftp_target(&self) -> ExecutorResult<SftpTarget> {
        if !self.is_configured() {
            return Err(ExecutorError::validation_error("缺少 SFTP 服务器地址"));
        }
        Ok(SftpTarget {
            host: self.ftp_host.clone(),
            port: parse_port(&self.ftp_port, 22)?,
            user: self.ftp_username.clone(),
            password: self.ftp_password.clone(),
        })
    }
}

/// 镜像在线存储位置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageInfo {
    pub hub_url: String,
    pub hub_user: String,
    pub hub_password: String,
    pub namespace: String,
    pub is_trust: bool,
}

impl ImageInfo {
    pub fn is_configured(&self) -> bool {
        !self.hub_url.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket_name: String,
}

impl S3Config {
    pub fn target(&self) -> S3Target {
        S3Target {
            endpoint: self.endpoint.clone(),
            region: if self.region.is_empty() {
                "us-east-1".to_string()
            } else {
                self.region.clone()
            },
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            bucket: self.bucket_name.clone(),
        }
    }
}

/// backup_apps_new
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupTaskBody {
    pub group_id: String,
    #[serde(default)]
    pub service_ids: Vec<String>,
    pub mode: BackupMode,
    pub version: String,
    #[serde(default)]
    pub slug_info: SlugInfo,
    #[serde(default)]
    pub image_info: ImageInfo,
    pub source_dir: String,
    pub backup_id: String,
    #[serde(default)]
    pub event_id: String,
    /// 在线备份未配置 SFTP 时, 备份包上传到对象存储
    #[serde(default)]
    pub s3_config: Option<S3Config>,
}

impl BackupTaskBody {
    /// service_ids 为空表示组内全部组件
    pub fn includes(&self, service_id: &str) -> bool {
        self.service_ids.is_empty() || self.service_ids.iter().any(|id| id == service_id)
    }
}

/// backup_apps_restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreTaskBody {
    pub backup_id: String,
    pub tenant_id: String,
    /// cdct / cdot / od
    #[serde(default)]
    pub restore_mode: String,
    pub restore_id: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub slug_info: SlugInfo,
    #[serde(default)]
    pub image_info: ImageInfo,
    #[serde(default)]
    pub s3_config: Option<S3Config>,
}

/// delete_backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteBackupBody {
    pub backup_id: String,
    #[serde(default)]
    pub event_id: String,
    /// 删除 SFTP 上的备份包时使用
    #[serde(default)]
    pub slug_info: SlugInfo,
    #[serde(default)]
    pub s3_config: Option<S3Config>,
}

/// 恢复过程中单个组件的身份变更
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceChange {
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "ServiceAlias")]
    pub service_alias: String,
    #[serde(rename = "Status")]
    pub status: String,
    /// 备份端口 -> 重新分配的端口
    #[serde(rename = "LBPorts", default)]
    pub lb_ports: BTreeMap<i64, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub status: RestoreStatus,
    pub message: String,
    pub create_time: DateTime<Utc>,
    pub service_change: BTreeMap<String, ServiceChange>,
    pub backup_id: String,
    pub restore_mode: String,
    pub event_id: String,
    pub restore_id: String,
    pub cache_dir: String,
}

pub fn restore_result_key(restore_id: &str) -> String {
    format!("/rainbond/backup_restore/{restore_id}")
}
