use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCAL_DATA_PATH: &str = "/grlocaldata";
pub const DEFAULT_SHARE_DATA_PATH: &str = "/grdata";

/// 文件系统根路径
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 本地存储卷根目录 (LOCAL_DATA_PATH)
    pub local_data_path: String,
    /// 共享存储卷根目录 (SHARE_DATA_PATH)
    pub share_data_path: String,
    /// 恢复任务的下载缓存目录
    pub cache_root: String,
    /// 恢复持久化数据时的临时解压目录
    pub tmp_root: String,
    /// 源码构建的检出目录
    pub source_root: String,
    /// slug 包存放根目录
    pub slug_root: String,
}

impl StorageConfig {
    pub fn local_data_path_from_env() -> String {
        std::env::var("LOCAL_DATA_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCAL_DATA_PATH.to_string())
    }

    pub fn share_data_path_from_env() -> String {
        std::env::var("SHARE_DATA_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_SHARE_DATA_PATH.to_string())
    }

    /// 所有路径都挂在同一个根目录下, 测试时使用
    pub fn rooted_at(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            local_data_path: format!("{root}/grlocaldata"),
            share_data_path: format!("{root}/grdata"),
            cache_root: format!("{root}/grdata/cache/tmp"),
            tmp_root: format!("{root}/grdata/tmp"),
            source_root: format!("{root}/cache/source"),
            slug_root: format!("{root}/grdata/build/tenant"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let share = Self::share_data_path_from_env();
        Self {
            local_data_path: Self::local_data_path_from_env(),
            cache_root: format!("{share}/cache/tmp"),
            tmp_root: format!("{share}/tmp"),
            source_root: "/cache/source".to_string(),
            slug_root: format!("{share}/build/tenant"),
            share_data_path: share,
        }
    }
}

impl ConfigValidator for StorageConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_absolute_path(&self.local_data_path, "storage.local_data_path")?;
        ValidationUtils::validate_absolute_path(&self.share_data_path, "storage.share_data_path")?;
        ValidationUtils::validate_absolute_path(&self.cache_root, "storage.cache_root")?;
        ValidationUtils::validate_absolute_path(&self.tmp_root, "storage.tmp_root")?;
        ValidationUtils::validate_absolute_path(&self.source_root, "storage.source_root")?;
        ValidationUtils::validate_absolute_path(&self.slug_root, "storage.slug_root")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooted_storage_layout() {
        let config = StorageConfig::rooted_at("/tmp/run/");
        assert_eq!(config.share_data_path, "/tmp/run/grdata");
        assert_eq!(config.cache_root, "/tmp/run/grdata/cache/tmp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relative_path_rejected() {
        let mut config = StorageConfig::rooted_at("/tmp/run");
        config.tmp_root = "tmp".to_string();
        assert!(config.validate().is_err());
    }
}
