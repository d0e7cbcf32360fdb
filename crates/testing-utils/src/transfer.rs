use async_trait::async_trait;
use executor_domain::{
    EventLogger, ExecutorError, ExecutorResult, S3Target, SftpTarget, Transfer, TransferFactory,
    TransferKind,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    pub kind: TransferKind,
    pub op: &'static str,
    pub remote: String,
}

#[derive(Debug, Default)]
struct TransferLog {
    calls: Mutex<Vec<TransferCall>>,
    fail_remote: AtomicBool,
}

/// 用本地目录模拟远端存储的传输实现
pub struct RecordingTransfer {
    kind: TransferKind,
    /// 远端路径映射到该目录下, 本地传输时为 None
    remote_root: Option<PathBuf>,
    log: Arc<TransferLog>,
}

impl RecordingTransfer {
    fn resolve(&self, remote: &str) -> PathBuf {
        match &self.remote_root {
            Some(root) => root.join(remote.trim_start_matches('/')),
            None => PathBuf::from(remote),
        }
    }

    fn record(&self, op: &'static str, remote: &str) -> ExecutorResult<()> {
        self.log.calls.lock().unwrap().push(TransferCall {
            kind: self.kind,
            op,
            remote: remote.to_string(),
        });
        if self.kind != TransferKind::Local && self.log.fail_remote.load(Ordering::SeqCst) {
            return Err(ExecutorError::transfer_error(format!("{op} {remote} 失败")));
        }
        Ok(())
    }
}

async fn copy_file(from: &Path, to: &Path) -> ExecutorResult<u64> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| ExecutorError::transfer_error(format!("复制 {} 失败: {e}", from.display())))
}

#[async_trait]
impl Transfer for RecordingTransfer {
    fn kind(&self) -> TransferKind {
        self.kind
    }

    async fn push_file(
        &self,
        local: &Path,
        remote: &str,
        _logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        self.record("push", remote)?;
        copy_file(local, &self.resolve(remote)).await
    }

    async fn download_file(
        &self,
        remote: &str,
        local: &Path,
        _logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        self.record("download", remote)?;
        copy_file(&self.resolve(remote), local).await
    }

    async fn delete(&self, remote: &str) -> ExecutorResult<bool> {
        self.record("delete", remote)?;
        let path = self.resolve(remote);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await?,
            Ok(_) => tokio::fs::remove_file(&path).await?,
            Err(_) => return Ok(false),
        }
        Ok(true)
    }

    async fn exists(&self, remote: &str) -> ExecutorResult<bool> {
        self.record("exists", remote)?;
        Ok(tokio::fs::try_exists(self.resolve(remote)).await?)
    }
}

/// 统计远端传输的创建次数和调用
pub struct RecordingTransferFactory {
    remote_root: PathBuf,
    log: Arc<TransferLog>,
    sftp_targets: Mutex<Vec<SftpTarget>>,
    s3_targets: Mutex<Vec<S3Target>>,
    remote_created: AtomicUsize,
}

impl RecordingTransferFactory {
    pub fn new<P: Into<PathBuf>>(remote_root: P) -> Arc<Self> {
        Arc::new(Self {
            remote_root: remote_root.into(),
            log: Arc::new(TransferLog::default()),
            sftp_targets: Mutex::new(Vec::new()),
            s3_targets: Mutex::new(Vec::new()),
            remote_created: AtomicUsize::new(0),
        })
    }

    /// 远端 sftp/s3 操作全部失败
    pub fn fail_remote(&self, fail: bool) {
        self.log.fail_remote.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.log.calls.lock().unwrap().clone()
    }

    pub fn remote_calls(&self) -> Vec<TransferCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind != TransferKind::Local)
            .collect()
    }

    pub fn remote_created(&self) -> usize {
        self.remote_created.load(Ordering::SeqCst)
    }

    pub fn sftp_targets(&self) -> Vec<SftpTarget> {
        self.sftp_targets.lock().unwrap().clone()
    }

    pub fn s3_targets(&self) -> Vec<S3Target> {
        self.s3_targets.lock().unwrap().clone()
    }

    /// 远端路径在模拟存储中的位置
    pub fn remote_path(&self, remote: &str) -> PathBuf {
        self.remote_root.join(remote.trim_start_matches('/'))
    }

    fn remote(&self, kind: TransferKind, namespace: &str) -> Arc<dyn Transfer> {
        self.remote_created.fetch_add(1, Ordering::SeqCst);
        Arc::new(RecordingTransfer {
            kind,
            remote_root: Some(self.remote_root.join(namespace)),
            log: self.log.clone(),
        })
    }
}

impl TransferFactory for RecordingTransferFactory {
    fn local(&self) -> Arc<dyn Transfer> {
        Arc::new(RecordingTransfer {
            kind: TransferKind::Local,
            remote_root: None,
            log: self.log.clone(),
        })
    }

    fn sftp(&self, target: &SftpTarget) -> ExecutorResult<Arc<dyn Transfer>> {
        self.sftp_targets.lock().unwrap().push(target.clone());
        Ok(self.remote(TransferKind::Sftp, ""))
    }

    fn s3(&self, target: &S3Target) -> ExecutorResult<Arc<dyn Transfer>> {
        self.s3_targets.lock().unwrap().push(target.clone());
        Ok(self.remote(TransferKind::S3, &target.bucket))
    }
}
