//! 文件传输: 本地文件系统, SFTP 和 S3 兼容对象存储
//!
//! 所有实现都通过 [`copy_with_progress`] 拷贝数据, 进度以 JSON 行写入事件日志。

mod local;
mod s3;
mod sftp;

pub use local::LocalTransfer;
pub use s3::S3Transfer;
pub use sftp::SftpTransfer;

use executor_domain::{
    steps, EventLogger, S3Target, SftpTarget, StepStatus, Transfer, TransferFactory,
};
use executor_errors::ExecutorResult;
use std::io::{self, Read, Write};
use std::sync::Arc;

const COPY_BUFFER_SIZE: usize = 1024 * 1024;
const BAR_WIDTH: u64 = 50;

/// 流式拷贝并按整数百分比输出进度, 写入字节数与 `total` 不一致时返回 `WriteZero`
pub fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    logger: Option<&dyn EventLogger>,
) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut reporter = logger.map(|l| ProgressReporter::new(l, total));
    let mut written = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        written += n as u64;
        if let Some(reporter) = reporter.as_mut() {
            reporter.update(written);
        }
    }
    writer.flush()?;

    if let Some(reporter) = reporter.as_mut() {
        reporter.finish(written);
    }
    if written != total {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("写入 {written} 字节, 期望 {total} 字节"),
        ));
    }
    Ok(written)
}

/// 进度行生成器
pub struct ProgressReporter<'a> {
    logger: &'a dyn EventLogger,
    total: u64,
    id: String,
    last_percent: Option<u64>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(logger: &'a dyn EventLogger, total: u64) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string()[..7].to_string();
        Self {
            logger,
            total,
            id,
            last_percent: None,
        }
    }

    pub fn update(&mut self, current: u64) {
        let percent = percent_of(current, self.total);
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        self.emit(current);
    }

    fn finish(&mut self, current: u64) {
        if self.last_percent != Some(100) || current != self.total {
            self.last_percent = Some(100);
            self.emit(current);
        }
    }

    fn emit(&self, current: u64) {
        let line = progress_line(current, self.total, &self.id);
        self.logger.debug(&line, steps::PROGRESS, StepStatus::Running);
    }
}

fn percent_of(current: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        (current.min(total) * 100) / total
    }
}

pub fn progress_line(current: u64, total: u64, id: &str) -> String {
    let filled = if total == 0 {
        BAR_WIDTH
    } else {
        (current.min(total) * BAR_WIDTH / total).max(1)
    };
    let mut bar = String::with_capacity(BAR_WIDTH as usize + 2);
    bar.push('[');
    bar.extend(std::iter::repeat('=').take(filled as usize));
    bar.push('>');
    while bar.len() < BAR_WIDTH as usize {
        bar.push(' ');
    }
    let mb = |bytes: u64| bytes as f64 / 1024.0 / 1024.0;

    serde_json::json!({
        "progress": format!("{bar}] {:.1} MB/{:.1} MB", mb(current), mb(total)),
        "progressDetail": { "current": current, "total": total },
        "id": id,
    })
    .to_string()
}

/// 根据目标构造具体传输实现
#[derive(Debug, Default, Clone)]
pub struct DefaultTransferFactory;

impl DefaultTransferFactory {
    pub fn new() -> Self {
        Self
    }
}

impl TransferFactory for DefaultTransferFactory {
    fn local(&self) -> Arc<dyn Transfer> {
        Arc::new(LocalTransfer::new())
    }

    fn sftp(&self, target: &SftpTarget) -> ExecutorResult<Arc<dyn Transfer>> {
        Ok(Arc::new(SftpTransfer::new(target.clone())?))
    }

    fn s3(&self, target: &S3Target) -> ExecutorResult<Arc<dyn Transfer>> {
        Ok(Arc::new(S3Transfer::new(target)?))
    }
}
