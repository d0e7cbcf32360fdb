use async_trait::async_trait;
use executor_domain::{EventLogger, SftpTarget, Transfer, TransferKind};
use executor_errors::{ExecutorError, ExecutorResult};
use sha2::{Digest, Sha256};
use ssh2::{ErrorCode, Session, Sftp};
use std::fs;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::copy_with_progress;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_TIMEOUT_MS: u32 = 10 * 60 * 1000;
/// LIBSSH2_FX_NO_SUCH_FILE
const SFTP_NO_SUCH_FILE: i32 = 2;
const CHECKSUM_SUFFIX: &str = ".sha256";

/// 基于 ssh2 的 SFTP 传输。libssh2 是阻塞接口, 每次调用在阻塞线程池中新建会话
pub struct SftpTransfer {
    target: SftpTarget,
}

impl SftpTransfer {
    pub fn new(target: SftpTarget) -> ExecutorResult<Self> {
        if target.host.is_empty() {
            return Err(ExecutorError::config_error("SFTP 主机地址不能为空"));
        }
        Ok(Self { target })
    }

    pub fn target(&self) -> &SftpTarget {
        &self.target
    }

    async fn with_sftp<T, F>(&self, op: F) -> ExecutorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> ExecutorResult<T> + Send + 'static,
    {
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let sftp = connect(&target)?;
            op(&sftp)
        })
        .await
        .map_err(|e| ExecutorError::Internal(format!("SFTP 任务异常退出: {e}")))?
    }
}

fn connect(target: &SftpTarget) -> ExecutorResult<Sftp> {
    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| ExecutorError::transfer_error(format!("解析 {}:{} 失败: {e}", target.host, target.port)))?
        .next()
        .ok_or_else(|| ExecutorError::transfer_error(format!("无法解析地址 {}", target.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|e| {
        ExecutorError::transfer_error(format!("连接 {}:{} 失败: {e}", target.host, target.port))
    })?;

    let mut session = Session::new().map_err(sftp_error("创建SSH会话失败"))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(SESSION_TIMEOUT_MS);
    session.handshake().map_err(sftp_error("SSH握手失败"))?;
    session
        .userauth_password(&target.user, &target.password)
        .map_err(sftp_error("SFTP 认证失败"))?;
    if !session.authenticated() {
        return Err(ExecutorError::transfer_error("SFTP 认证失败"));
    }

    session.sftp().map_err(sftp_error("创建SFTP会话失败"))
}

fn sftp_error(what: &'static str) -> impl Fn(ssh2::Error) -> ExecutorError {
    move |e| ExecutorError::transfer_error(format!("{what}: {e}"))
}

fn is_not_found(e: &ssh2::Error) -> bool {
    e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE)
}

/// 逐级创建远端目录
fn mkdir_all(sftp: &Sftp, dir: &Path) -> ExecutorResult<()> {
    let mut current = PathBuf::new();
    for component in dir.components() {
        current.push(component);
        if matches!(component, Component::RootDir | Component::Prefix(_)) {
            continue;
        }
        match sftp.stat(&current) {
            Ok(stat) if stat.is_dir() => {}
            Ok(_) => {
                return Err(ExecutorError::transfer_error(format!(
                    "远端路径 {} 已存在且不是目录",
                    current.display()
                )))
            }
            Err(e) if is_not_found(&e) => {
                sftp.mkdir(&current, 0o755)
                    .map_err(sftp_error("创建远端目录失败"))?;
            }
            Err(e) => return Err(sftp_error("读取远端目录失败")(e)),
        }
    }
    Ok(())
}

pub(crate) fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn read_remote_checksum(sftp: &Sftp, path: &Path) -> Option<String> {
    let mut file = sftp.open(path).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content.trim().to_string())
}

fn push_blocking(
    sftp: &Sftp,
    local: &Path,
    remote: &Path,
    logger: &dyn EventLogger,
) -> ExecutorResult<u64> {
    let size = fs::metadata(local)?.len();
    let checksum = file_checksum(local)?;
    let sidecar = PathBuf::from(format!("{}{CHECKSUM_SUFFIX}", remote.display()));

    if read_remote_checksum(sftp, &sidecar).as_deref() == Some(checksum.as_str()) {
        info!("远端文件 {} 校验和一致, 跳过上传", remote.display());
        return Ok(size);
    }

    if let Some(parent) = remote.parent() {
        mkdir_all(sftp, parent)?;
    }
    match sftp.unlink(remote) {
        Ok(()) => debug!("删除旧的远端文件 {}", remote.display()),
        Err(e) if is_not_found(&e) => {}
        Err(e) => return Err(sftp_error("删除旧的远端文件失败")(e)),
    }

    let mut reader = fs::File::open(local)?;
    let mut writer = sftp.create(remote).map_err(sftp_error("创建远端文件失败"))?;
    let written = copy_with_progress(&mut reader, &mut writer, size, Some(logger))
        .map_err(|e| ExecutorError::transfer_error(format!("上传 {} 失败: {e}", remote.display())))?;
    drop(writer);

    let mut sum_file = sftp
        .create(&sidecar)
        .map_err(sftp_error("写入校验文件失败"))?;
    sum_file.write_all(checksum.as_bytes())?;

    Ok(written)
}

fn download_blocking(
    sftp: &Sftp,
    remote: &Path,
    local: &Path,
    logger: &dyn EventLogger,
) -> ExecutorResult<u64> {
    let stat = sftp.stat(remote).map_err(|e| {
        ExecutorError::transfer_error(format!("读取远端文件 {} 失败: {e}", remote.display()))
    })?;
    let size = stat.size.unwrap_or(0);

    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut reader = sftp.open(remote).map_err(sftp_error("打开远端文件失败"))?;
    let mut writer = fs::File::create(local)?;
    copy_with_progress(&mut reader, &mut writer, size, Some(logger)).map_err(|e| {
        ExecutorError::transfer_error(format!("下载 {} 失败: {e}", remote.display()))
    })
}

/// 删除文件及其校验文件, 目录则递归删除
fn remove_blocking(sftp: &Sftp, remote: &Path) -> ExecutorResult<bool> {
    let stat = match sftp.lstat(remote) {
        Ok(stat) => stat,
        Err(e) if is_not_found(&e) => return Ok(false),
        Err(e) => return Err(sftp_error("读取远端文件失败")(e)),
    };
    if stat.is_dir() {
        remove_dir_blocking(sftp, remote)?;
        return Ok(true);
    }

    sftp.unlink(remote).map_err(sftp_error("删除远端文件失败"))?;
    let sidecar = PathBuf::from(format!("{}{CHECKSUM_SUFFIX}", remote.display()));
    match sftp.unlink(&sidecar) {
        Ok(()) => {}
        Err(e) if is_not_found(&e) => {}
        Err(e) => warn!("删除校验文件 {} 失败: {e}", sidecar.display()),
    }
    Ok(true)
}

fn remove_dir_blocking(sftp: &Sftp, dir: &Path) -> ExecutorResult<()> {
    let entries = sftp.readdir(dir).map_err(sftp_error("读取远端目录失败"))?;
    for (path, stat) in entries {
        if stat.is_dir() {
            remove_dir_blocking(sftp, &path)?;
        } else {
            sftp.unlink(&path).map_err(sftp_error("删除远端文件失败"))?;
        }
    }
    debug!("删除远端目录 {}", dir.display());
    sftp.rmdir(dir).map_err(sftp_error("删除远端目录失败"))
}

#[async_trait]
impl Transfer for SftpTransfer {
    fn kind(&self) -> TransferKind {
        TransferKind::Sftp
    }

    async fn push_file(
        &self,
        local: &Path,
        remote: &str,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        info!("上传 {} 到 sftp://{}{}", local.display(), self.target.host, remote);
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.with_sftp(move |sftp| push_blocking(sftp, &local, &remote, logger.as_ref()))
            .await
    }

    async fn download_file(
        &self,
        remote: &str,
        local: &Path,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<u64> {
        info!("从 sftp://{}{} 下载到 {}", self.target.host, remote, local.display());
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.with_sftp(move |sftp| download_blocking(sftp, &remote, &local, logger.as_ref()))
            .await
    }

    async fn delete(&self, remote: &str) -> ExecutorResult<bool> {
        info!("删除 sftp://{}{}", self.target.host, remote);
        let remote = PathBuf::from(remote);
        self.with_sftp(move |sftp| remove_blocking(sftp, &remote)).await
    }

    async fn exists(&self, remote: &str) -> ExecutorResult<bool> {
        let remote = PathBuf::from(remote);
        self.with_sftp(move |sftp| match sftp.stat(&remote) {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(sftp_error("读取远端文件失败")(e)),
        })
        .await
    }
}
