use async_trait::async_trait;
use executor_domain::{EventLogger, S3Target, Transfer, TransferKind};
use executor_errors::{ExecutorError, ExecutorResult};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::copy_with_progress;

/// S3 兼容对象存储, remote 为桶内对象键
pub struct S3Transfer {
    bucket: Box<Bucket>,
}

impl S3Transfer {
    pub fn new(target: &S3Target) -> ExecutorResult<Self> {
        if target.bucket.is_empty() {
            return Err(ExecutorError::config_error("S3 bucket 不能为空"));
        }
        let credentials = Credentials::new(
            Some(&target.access_key),
            Some(&target.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| ExecutorError::config_error(format!("无效的 S3 凭证: {e}")))?;

        let region = if target.endpoint.is_empty() {
            target
                .region
                .parse()
                .map_err(|_| ExecutorError::config_error(format!("无效的 S3 区域: {}", target.region)))?
        } else {
            Region::Custom {
                region: target.region.clone(),
                endpoint: target.endpoint.clone(),
            }
        };
        let path_style = !target.endpoint.is_empty();

        let bucket = Bucket::new(&target.bucket, region, credentials)
            .map_err(|e| ExecutorError::config_error(format!("创建 S3 bucket 失败: {e}")))?;
        // MinIO 等自建存储使用 path-style
        let bucket = if path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self { bucket })
    }

    fn is_not_found(err: &s3::error::S3Error) -> bool {
        let msg = err.to_string();
        msg.contains("404") || msg.contains("NoSuchKey") || msg.contains("Not Found")
    }
}

#[async_trait]
impl Transfer for S3Transfer {
    fn kind(&self) -> TransferKind {
        TransferKind::S3
    }

    async fn push_file(
        &self,
        local: &Path,
        remote: &str,
        _logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        let content = tokio::fs::read(local).await?;
        let size = content.len() as u64;
        let response = self
            .bucket
            .put_object(remote, &content)
            .await
            .map_err(|e| ExecutorError::transfer_error(format!("上传对象 {remote} 失败: {e}")))?;
        if !(200..300).contains(&response.status_code()) {
            return Err(ExecutorError::transfer_error(format!(
                "上传对象 {remote} 失败, 状态码 {}",
                response.status_code()
            )));
        }
        info!("上传 {} 到 s3://{}/{}", local.display(), self.bucket.name(), remote);
        Ok(size)
    }

    async fn download_file(
        &self,
        remote: &str,
        local: &Path,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        let response = self
            .bucket
            .get_object(remote)
            .await
            .map_err(|e| ExecutorError::transfer_error(format!("下载对象 {remote} 失败: {e}")))?;
        if !(200..300).contains(&response.status_code()) {
            return Err(ExecutorError::transfer_error(format!(
                "下载对象 {remote} 失败, 状态码 {}",
                response.status_code()
            )));
        }

        let data = response.bytes().to_vec();
        let local = local.to_path_buf();
        tokio::task::spawn_blocking(move || -> ExecutorResult<u64> {
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let total = data.len() as u64;
            let mut writer = std::fs::File::create(&local)?;
            Ok(copy_with_progress(
                &mut Cursor::new(data),
                &mut writer,
                total,
                Some(logger.as_ref()),
            )?)
        })
        .await
        .map_err(|e| ExecutorError::Internal(format!("写入下载文件的任务异常退出: {e}")))?
    }

    async fn delete(&self, remote: &str) -> ExecutorResult<bool> {
        if !self.exists(remote).await? {
            debug!("对象 {} 不存在", remote);
            return Ok(false);
        }
        self.bucket
            .delete_object(remote)
            .await
            .map_err(|e| ExecutorError::transfer_error(format!("删除对象 {remote} 失败: {e}")))?;
        info!("已删除 s3://{}/{}", self.bucket.name(), remote);
        Ok(true)
    }

    async fn exists(&self, remote: &str) -> ExecutorResult<bool> {
        match self.bucket.head_object(remote).await {
            Ok((_, code)) if code == 404 => Ok(false),
            Ok(_) => Ok(true),
            Err(e) if Self::is_not_found(&e) => Ok(false),
            Err(e) => Err(ExecutorError::transfer_error(format!(
                "查询对象 {remote} 失败: {e}"
            ))),
        }
    }
}
