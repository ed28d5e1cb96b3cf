//! 上传目录访问：文件名清洗、列表、保存、删除与读取。

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, ErrorKind};
use tracing::debug;

use crate::atomic::AtomicFile;
use crate::config::ALLOWED_EXTENSIONS;
use crate::imaging;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key")]
    InvalidKey,
    #[error("extension not allowed")]
    UnsupportedType,
    #[error("content is not a supported image")]
    InvalidImage,
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 单一目录的图片存储，文件名即存储键。
#[derive(Clone, Debug)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将存储键解析为目录内路径，只接受单个普通路径段。
    pub fn resolve_key(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\', '"'])
            || key.chars().any(char::is_control)
        {
            return Err(StorageError::InvalidKey);
        }
        let mut components = Path::new(key).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Ok(self.root.join(segment)),
            _ => Err(StorageError::InvalidKey),
        }
    }

    /// 解析已存在的普通图片文件，拒绝符号链接；不在扩展名白名单内的文件视为不存在。
    pub async fn resolve_existing(&self, key: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve_key(key)?;
        if !has_allowed_extension(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        match fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.file_type().is_symlink() => Err(StorageError::InvalidKey),
            Ok(metadata) if metadata.is_file() => Ok(target),
            Ok(_) => Err(StorageError::NotFound(key.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// 列出允许扩展名的图片，按名称排序；目录为空时返回空列表。
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !has_allowed_extension(&name) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// 计算上传文件的存储名：清洗文件名并检查扩展名。
    pub fn upload_name(&self, filename: &str) -> Result<String, StorageError> {
        let name = sanitize_filename(filename).ok_or(StorageError::InvalidKey)?;
        if !has_allowed_extension(&name) {
            return Err(StorageError::UnsupportedType);
        }
        Ok(name)
    }

    /// 保存新上传的图片，返回清洗后的文件名。同名文件存在时拒绝，不覆盖。
    ///
    /// 内容先写入临时文件，完整落盘后再发布，读取方不会看到写了一半的文件。
    pub async fn upload(&self, filename: &str, data: Vec<u8>) -> Result<String, StorageError> {
        let name = self.upload_name(filename)?;
        let data = tokio::task::spawn_blocking(move || imaging::verify(&data).map(|_| data))
            .await
            .map_err(|err| StorageError::Io(io::Error::other(err.to_string())))?
            .map_err(|_| StorageError::InvalidImage)?;

        self.ensure_root().await?;
        let target = self.resolve_key(&name)?;
        if fs::symlink_metadata(&target).await.is_ok() {
            return Err(StorageError::AlreadyExists(name));
        }

        let mut atomic = AtomicFile::new(&target).await?;
        if let Err(err) = atomic.file_mut().write_all(&data).await {
            atomic.cleanup().await;
            return Err(StorageError::Io(err));
        }
        match atomic.finalize_new().await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(name));
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        debug!(name, bytes = data.len(), "image stored");
        Ok(name)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let target = self.resolve_existing(key).await?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// 打开文件用于下载，返回句柄与元数据。
    pub async fn open(&self, key: &str) -> Result<(File, std::fs::Metadata), StorageError> {
        let target = self.resolve_existing(key).await?;
        let file = File::open(&target).await?;
        let metadata = file.metadata().await?;
        Ok((file, metadata))
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.resolve_existing(key).await?;
        Ok(fs::read(target).await?)
    }

    /// 原子覆盖已存在的文件。
    pub async fn replace(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let target = self.resolve_existing(key).await?;
        let mut atomic = AtomicFile::new(&target).await?;
        if let Err(err) = atomic.file_mut().write_all(data).await {
            atomic.cleanup().await;
            return Err(StorageError::Io(err));
        }
        atomic.finalize().await?;
        Ok(())
    }
}

/// 判断文件名扩展名是否在允许列表中（不区分大小写）。
pub fn has_allowed_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// 清洗客户端提供的文件名：路径分隔符视为空白，空白折叠为 `_`，
/// 只保留 ASCII 字母数字与 `_.-`，并去掉首尾的 `.` 和 `_`。
pub fn sanitize_filename(name: &str) -> Option<String> {
    let spaced = name.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
        .collect();
    let trimmed = filtered.trim_matches(['.', '_']);
    if trimmed.is_empty() {
        return None;
    }
    let stem = trimmed.split('.').next().unwrap_or_default();
    if is_windows_device_name(stem) {
        return Some(format!("_{trimmed}"));
    }
    Some(trimmed.to_string())
}

fn is_windows_device_name(stem: &str) -> bool {
    const DEVICES: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    DEVICES.iter().any(|device| stem.eq_ignore_ascii_case(device))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::tempdir;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 40 % 256) as u8, (y * 60 % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).expect("encode png");
        out.into_inner()
    }

    pub(crate) fn make_store() -> (tempfile::TempDir, ImageStore) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("uploads");
        std::fs::create_dir_all(&root).expect("create upload root");
        (temp, ImageStore::new(root))
    }

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("my cat.png").as_deref(), Some("my_cat.png"));
        assert_eq!(
            sanitize_filename("../../etc/passwd.png").as_deref(),
            Some("etc_passwd.png")
        );
        assert_eq!(sanitize_filename("ñandú.jpg").as_deref(), Some("and.jpg"));
        assert_eq!(sanitize_filename("con.png").as_deref(), Some("_con.png"));
        assert_eq!(sanitize_filename("..."), None);
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_allowed_extension("a.PNG"));
        assert!(has_allowed_extension("b.jpeg"));
        assert!(!has_allowed_extension("c.gif"));
        assert!(!has_allowed_extension("png"));
    }

    #[test]
    fn resolve_key_rejects_traversal() {
        let (_temp, store) = make_store();
        assert!(matches!(
            store.resolve_key("../a.png"),
            Err(StorageError::InvalidKey)
        ));
        assert!(matches!(
            store.resolve_key("sub/a.png"),
            Err(StorageError::InvalidKey)
        ));
        assert!(matches!(store.resolve_key(".."), Err(StorageError::InvalidKey)));
        assert!(store.resolve_key("a.png").is_ok());
    }

    #[test]
    fn resolve_key_rejects_quotes_and_control_characters() {
        let (_temp, store) = make_store();
        assert!(matches!(
            store.resolve_key("a\".png"),
            Err(StorageError::InvalidKey)
        ));
        assert!(matches!(
            store.resolve_key("a\r\nb.png"),
            Err(StorageError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn files_outside_the_allow_list_are_unreachable() {
        let (_temp, store) = make_store();
        let notes = store.root_path().join("notes.txt");
        std::fs::write(&notes, b"secret").expect("write");

        assert!(matches!(
            store.read("notes.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.open("notes.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("notes.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.replace("notes.txt", b"x").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(std::fs::read(&notes).expect("still there"), b"secret");
    }

    #[tokio::test]
    async fn upload_then_read_round_trips() {
        let (_temp, store) = make_store();
        let bytes = png_bytes(8, 8);
        let name = store.upload("a.png", bytes.clone()).await.expect("upload");
        assert_eq!(name, "a.png");
        assert_eq!(store.read("a.png").await.expect("read"), bytes);

        let entries = std::fs::read_dir(store.root_path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn duplicate_upload_conflicts_and_keeps_original() {
        let (_temp, store) = make_store();
        let original = png_bytes(4, 4);
        store.upload("a.png", original.clone()).await.expect("upload");

        let result = store.upload("a.png", png_bytes(6, 6)).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
        assert_eq!(store.read("a.png").await.expect("read"), original);
    }

    #[tokio::test]
    async fn non_image_bytes_are_rejected() {
        let (_temp, store) = make_store();
        let result = store.upload("x.png", b"definitely not a png".to_vec()).await;
        assert!(matches!(result, Err(StorageError::InvalidImage)));
        assert!(store.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected() {
        let (_temp, store) = make_store();
        let result = store.upload("x.gif", png_bytes(2, 2)).await;
        assert!(matches!(result, Err(StorageError::UnsupportedType)));
    }

    #[tokio::test]
    async fn list_filters_extensions_and_hidden_files() {
        let (_temp, store) = make_store();
        store.upload("b.png", png_bytes(2, 2)).await.expect("upload");
        store.upload("a.jpg", png_bytes(2, 2)).await.expect("upload");
        std::fs::write(store.root_path().join("notes.txt"), b"x").expect("write");
        std::fs::write(store.root_path().join(".pixel-tmp.c.png"), b"x").expect("write");

        let names = store.list().await.expect("list");
        assert_eq!(names, vec!["a.jpg".to_string(), "b.png".to_string()]);
    }

    #[tokio::test]
    async fn list_of_missing_folder_is_empty() {
        let temp = tempdir().expect("tempdir");
        let store = ImageStore::new(temp.path().join("never-created"));
        assert!(store.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn delete_missing_file_leaves_listing_alone() {
        let (_temp, store) = make_store();
        store.upload("keep.png", png_bytes(2, 2)).await.expect("upload");

        let result = store.delete("ghost.png").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(store.list().await.expect("list"), vec!["keep.png".to_string()]);

        store.delete("keep.png").await.expect("delete");
        assert!(store.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn replace_overwrites_existing_file() {
        let (_temp, store) = make_store();
        store.upload("a.png", png_bytes(2, 2)).await.expect("upload");
        store.replace("a.png", b"new bytes").await.expect("replace");
        assert_eq!(store.read("a.png").await.expect("read"), b"new bytes");
        assert_eq!(store.list().await.expect("list"), vec!["a.png".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_existing_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let (temp, store) = make_store();
        let outside = temp.path().join("outside.png");
        std::fs::write(&outside, png_bytes(2, 2)).expect("write outside file");
        symlink(&outside, store.root_path().join("link.png")).expect("symlink");

        let result = store.resolve_existing("link.png").await;
        assert!(matches!(result, Err(StorageError::InvalidKey)));
    }
}
