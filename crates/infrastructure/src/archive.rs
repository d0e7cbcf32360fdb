//! zip 打包解包与目录搬移
//!
//! 都是同步实现, 由调用方放进 `spawn_blocking`。

use executor_errors::{ExecutorError, ExecutorResult};
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn zip_err(e: zip::result::ZipError) -> ExecutorError {
    ExecutorError::archive_error(e.to_string())
}

/// 打包目录, 条目以源目录名为前缀, 与平台已有备份包兼容
pub fn zip_dir(source: &Path, target: &Path) -> ExecutorResult<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ExecutorError::archive_error(format!("无效的源目录 {}", source.display())))?;

    let file = fs::File::create(target)?;
    let mut zip = ZipWriter::new(file);
    let mut entries = 0u64;

    let root_mode = fs::metadata(source)?.permissions().mode();
    zip.add_directory(
        format!("{base}/"),
        SimpleFileOptions::default().unix_permissions(root_mode),
    )
    .map_err(zip_err)?;

    let mut stack = vec![(source.to_path_buf(), base)];
    while let Some((dir, prefix)) = stack.pop() {
        let mut children: Vec<_> = fs::read_dir(&dir)?.collect::<Result<_, _>>()?;
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let path = entry.path();
            let name = format!("{prefix}/{}", entry.file_name().to_string_lossy());
            let meta = fs::metadata(&path)?;
            let mode = meta.permissions().mode();

            if meta.is_dir() {
                zip.add_directory(
                    format!("{name}/"),
                    SimpleFileOptions::default().unix_permissions(mode),
                )
                .map_err(zip_err)?;
                stack.push((path, name));
            } else {
                let options = SimpleFileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .unix_permissions(mode)
                    .large_file(meta.len() >= u32::MAX as u64);
                zip.start_file(name, options).map_err(zip_err)?;
                let mut reader = fs::File::open(&path)?;
                io::copy(&mut reader, &mut zip)?;
            }
            entries += 1;
        }
    }

    let mut file = zip.finish().map_err(zip_err)?;
    file.flush()?;
    debug!("打包 {} -> {}, 共 {} 个条目", source.display(), target.display(), entries);
    Ok(entries)
}

/// 解压到目标目录, 拒绝越界路径
pub fn unzip(archive: &Path, target: &Path) -> ExecutorResult<()> {
    let file = fs::File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(zip_err)?;
    fs::create_dir_all(target)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            ExecutorError::archive_error(format!("压缩包中存在非法路径: {}", entry.name()))
        })?;
        let out = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut writer = fs::File::create(&out)?;
            io::copy(&mut entry, &mut writer)?;
        }
        if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&out, fs::Permissions::from_mode(mode))?;
        }
    }
    debug!("解压 {} -> {}", archive.display(), target.display());
    Ok(())
}

pub fn dir_is_empty(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// 目录中唯一的子目录; 存在多个条目或没有子目录时返回 None
pub fn single_top_level_dir(path: &Path) -> io::Result<Option<PathBuf>> {
    let entries: Vec<_> = fs::read_dir(path)?.collect::<Result<_, _>>()?;
    match entries.as_slice() {
        [only] if only.file_type()?.is_dir() => Ok(Some(only.path())),
        _ => Ok(None),
    }
}

/// 改名到目标位置; 目标目录已存在时逐项合并, 已存在的文件被覆盖
pub fn rename_or_merge(from: &Path, to: &Path) -> ExecutorResult<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if !to.exists() {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(e) if crosses_devices(&e) => {
                copy_dir_all(from, to)?;
                fs::remove_dir_all(from)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
    merge_dir(from, to)
}

/// 跨设备无法改名, 调用方退化为拷贝
fn crosses_devices(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::CrossesDevices
}

pub fn merge_dir(from: &Path, to: &Path) -> ExecutorResult<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if entry.file_type()?.is_dir() && dst.is_dir() {
            merge_dir(&src, &dst)?;
        } else {
            rename_or_merge_file(&src, &dst)?;
        }
    }
    if let Err(e) = fs::remove_dir_all(from) {
        warn!(path = %from.display(), "合并后删除源目录失败: {e}");
    }
    Ok(())
}

fn rename_or_merge_file(from: &Path, to: &Path) -> ExecutorResult<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if crosses_devices(&e) => {
            if from.is_dir() {
                copy_dir_all(from, to)?;
            } else {
                fs::copy(from, to)?;
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn copy_dir_all(from: &Path, to: &Path) -> ExecutorResult<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dst = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &dst)?;
        } else {
            fs::copy(entry.path(), &dst)?;
        }
    }
    Ok(())
}

pub fn chmod(path: &Path, mode: u32) -> ExecutorResult<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// 判断 io 错误是否为文件不存在
pub fn is_not_found(err: &ExecutorError) -> bool {
    matches!(err.root_cause(), ExecutorError::Io(e) if e.kind() == io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_keeps_base_dir_and_unzip_restores_tree() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("gr123456-0")).unwrap();
        fs::write(data.join("gr123456-0/db.sqlite"), b"rows").unwrap();
        fs::write(data.join("top.txt"), b"hello").unwrap();

        let archive = dir.path().join("out/data.zip");
        let entries = zip_dir(&data, &archive).unwrap();
        assert_eq!(entries, 3);

        let target = dir.path().join("restore");
        unzip(&archive, &target).unwrap();
        assert_eq!(fs::read(target.join("data/top.txt")).unwrap(), b"hello");
        assert_eq!(
            fs::read(target.join("data/gr123456-0/db.sqlite")).unwrap(),
            b"rows"
        );
    }

    #[test]
    fn test_missing_archive_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = unzip(&dir.path().join("missing.zip"), dir.path()).unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn test_rename_or_merge_into_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        fs::create_dir_all(from.join("sub")).unwrap();
        fs::write(from.join("sub/new.txt"), b"new").unwrap();
        fs::write(from.join("same.txt"), b"fresh").unwrap();
        fs::create_dir_all(to.join("sub")).unwrap();
        fs::write(to.join("sub/old.txt"), b"old").unwrap();
        fs::write(to.join("same.txt"), b"stale").unwrap();

        rename_or_merge(&from, &to).unwrap();

        assert_eq!(fs::read(to.join("sub/new.txt")).unwrap(), b"new");
        assert_eq!(fs::read(to.join("sub/old.txt")).unwrap(), b"old");
        assert_eq!(fs::read(to.join("same.txt")).unwrap(), b"fresh");
        assert!(!from.exists());
    }

    #[test]
    fn test_cross_device_detection() {
        assert!(crosses_devices(&io::Error::from(io::ErrorKind::CrossesDevices)));
        assert!(crosses_devices(&io::Error::from_raw_os_error(18)));
        assert!(!crosses_devices(&io::Error::from(io::ErrorKind::NotFound)));
    }

    #[test]
    fn test_merge_dir_consumes_source() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        fs::create_dir_all(from.join("a/b")).unwrap();
        fs::write(from.join("a/b/f"), b"1").unwrap();
        fs::create_dir_all(to.join("a")).unwrap();

        merge_dir(&from, &to).unwrap();

        assert_eq!(fs::read(to.join("a/b/f")).unwrap(), b"1");
        assert!(!from.exists());
    }

    #[test]
    fn test_single_top_level_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bundle")).unwrap();
        assert_eq!(
            single_top_level_dir(dir.path()).unwrap(),
            Some(dir.path().join("bundle"))
        );
        fs::write(dir.path().join("extra"), b"").unwrap();
        assert_eq!(single_top_level_dir(dir.path()).unwrap(), None);
        assert!(!dir_is_empty(dir.path()).unwrap());
    }
}
