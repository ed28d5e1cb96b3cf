//! 临时写入与原子替换：修改后的图片先写临时文件，再整体替换原文件。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use uuid::Uuid;

use crate::config::ATOMIC_TEMP_PREFIX;

/// 可用于原子替换的临时文件封装。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件（以 `.` 开头，不会出现在列表中）。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let temp_name = format!("{ATOMIC_TEMP_PREFIX}{}", Uuid::new_v4());
        let temp_path = parent.join(temp_name);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子替换目标文件。
    pub async fn finalize(self) -> io::Result<()> {
        self.file.sync_all().await?;
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    return fs::rename(&self.temp_path, &self.target).await;
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(())
    }

    /// 同步后以硬链接发布到目标路径，目标已存在时返回 `AlreadyExists` 且不覆盖。
    pub async fn finalize_new(self) -> io::Result<()> {
        self.file.sync_all().await?;
        drop(self.file);

        let linked = fs::hard_link(&self.temp_path, &self.target).await;
        let _ = fs::remove_file(&self.temp_path).await;
        linked?;

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(())
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn cleanup_leaves_target_untouched() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("a.png");
        std::fs::write(&target, b"before").expect("write");

        let mut atomic = AtomicFile::new(&target).await.expect("atomic");
        atomic.file_mut().write_all(b"after").await.expect("write temp");
        atomic.cleanup().await;

        assert_eq!(std::fs::read(&target).expect("read"), b"before");
        let leftovers = std::fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn finalize_new_never_overwrites() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("a.png");

        let mut first = AtomicFile::new(&target).await.expect("atomic");
        first.file_mut().write_all(b"first").await.expect("write temp");
        first.finalize_new().await.expect("publish");

        let mut second = AtomicFile::new(&target).await.expect("atomic");
        second.file_mut().write_all(b"second").await.expect("write temp");
        let err = second.finalize_new().await.expect_err("target exists");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        assert_eq!(std::fs::read(&target).expect("read"), b"first");
        let entries = std::fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }
}
