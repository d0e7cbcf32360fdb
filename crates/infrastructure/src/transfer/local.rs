use async_trait::async_trait;
use executor_domain::{EventLogger, Transfer, TransferKind};
use executor_errors::{ExecutorError, ExecutorResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::copy_with_progress;

/// 本地文件系统之间的拷贝, remote 即目标路径
#[derive(Debug, Default, Clone)]
pub struct LocalTransfer;

impl LocalTransfer {
    pub fn new() -> Self {
        Self
    }

    fn copy_file(src: &Path, dst: &Path, logger: &dyn EventLogger) -> ExecutorResult<u64> {
        let meta = fs::metadata(src).map_err(|e| {
            ExecutorError::transfer_error(format!("读取 {} 失败: {e}", src.display()))
        })?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }

        // 先写临时文件再改名, 避免留下半个文件
        let tmp = dst.with_extension(format!(
            "{}.part",
            dst.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
        ));
        let mut reader = fs::File::open(src)?;
        let mut writer = fs::File::create(&tmp)?;
        let copied = match copy_with_progress(&mut reader, &mut writer, meta.len(), Some(logger)) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(ExecutorError::transfer_error(format!(
                    "拷贝 {} 到 {} 失败: {e}",
                    src.display(),
                    dst.display()
                )));
            }
        };
        fs::rename(&tmp, dst)?;
        Ok(copied)
    }

    async fn copy_blocking(
        src: PathBuf,
        dst: PathBuf,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        tokio::task::spawn_blocking(move || Self::copy_file(&src, &dst, logger.as_ref()))
            .await
            .map_err(|e| ExecutorError::Internal(format!("拷贝任务异常退出: {e}")))?
    }
}

#[async_trait]
impl Transfer for LocalTransfer {
    fn kind(&self) -> TransferKind {
        TransferKind::Local
    }

    async fn push_file(
        &self,
        local: &Path,
        remote: &str,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        debug!("本地拷贝 {} -> {}", local.display(), remote);
        Self::copy_blocking(local.to_path_buf(), PathBuf::from(remote), logger).await
    }

    async fn download_file(
        &self,
        remote: &str,
        local: &Path,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        debug!("本地拷贝 {} -> {}", remote, local.display());
        Self::copy_blocking(PathBuf::from(remote), local.to_path_buf(), logger).await
    }

    async fn delete(&self, remote: &str) -> ExecutorResult<bool> {
        let path = PathBuf::from(remote);
        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, remote: &str) -> ExecutorResult<bool> {
        Ok(tokio::fs::try_exists(remote).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor_domain::StepStatus;

    struct Silent;

    impl EventLogger for Silent {
        fn event_id(&self) -> &str {
            ""
        }
        fn info(&self, _: &str, _: &str, _: StepStatus) {}
        fn error(&self, _: &str, _: &str, _: StepStatus) {}
        fn debug(&self, _: &str, _: &str, _: StepStatus) {}
    }

    #[tokio::test]
    async fn test_push_creates_parent_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("slug.tgz");
        std::fs::write(&src, b"slug-bytes").unwrap();
        let dst = dir.path().join("a/b/c/slug.tgz");

        let transfer = LocalTransfer::new();
        let n = transfer
            .push_file(&src, dst.to_str().unwrap(), Arc::new(Silent))
            .await
            .unwrap();

        assert_eq!(n, 10);
        assert_eq!(std::fs::read(&dst).unwrap(), b"slug-bytes");
        assert!(transfer.exists(dst.to_str().unwrap()).await.unwrap());

        assert!(transfer.delete(dst.to_str().unwrap()).await.unwrap());
        assert!(!transfer.delete(dst.to_str().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_source_is_transfer_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalTransfer::new()
            .download_file(
                dir.path().join("nope").to_str().unwrap(),
                &dir.path().join("out"),
                Arc::new(Silent),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Transfer(_)));
    }
}
