use chrono::{DateTime, Local};
use serde::Serialize;
use std::cmp::Ordering;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::ErrorKind;

use crate::media::{MediaKind, extension_of};

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    follow_symlinks: bool,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            follow_symlinks: false,
        }
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将客户端路径解析到根目录之下，拒绝越界访问。
    pub async fn resolve_path_checked(
        &self,
        relative: &str,
        allow_missing_leaf: bool,
    ) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        if !self.follow_symlinks {
            self.ensure_no_symlink_components(&target, allow_missing_leaf)
                .await?;
        }
        Ok(target)
    }

    /// `resolve_path_checked` 的同步版本，供阻塞线程池中的代码使用。
    pub fn resolve_path_checked_blocking(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        if self.follow_symlinks {
            return Ok(target);
        }
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = self.root.clone();
        for component in relative.components() {
            current.push(component.as_os_str());
            let metadata = std::fs::symlink_metadata(&current)?;
            if metadata.file_type().is_symlink() {
                return Err(StorageError::InvalidPath);
            }
        }
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::Io(io::Error::new(
                            ErrorKind::NotFound,
                            "not a directory",
                        )));
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                    return Ok(());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// 读取一层目录。路径不存在或不是目录时都返回 `NotFound`。
    pub async fn list_dir(&self, relative: &str) -> Result<Vec<FileEntry>, StorageError> {
        let target = self.resolve_path_checked(relative, false).await?;
        let metadata = fs::metadata(&target).await?;
        if !metadata.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::NotFound,
                "not a directory",
            )));
        }

        let base = normalize_display_path(relative);
        let mut dir = fs::read_dir(&target).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            // stat 失败时该条目大小与时间记为 0
            let (size, modified_at) = match entry.metadata().await {
                Ok(metadata) => (
                    if is_dir { 0 } else { metadata.len() },
                    metadata
                        .modified()
                        .ok()
                        .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
                        .map(|duration| duration.as_secs() as i64)
                        .unwrap_or(0),
                ),
                Err(_) => (0, 0),
            };
            let extension = extension_of(&name);
            let kind = if is_dir {
                MediaKind::Other
            } else {
                MediaKind::from_extension(&extension)
            };
            let relative_path = if base == "/" {
                format!("/{name}")
            } else {
                format!("{base}/{name}")
            };

            entries.push(FileEntry {
                name,
                is_dir,
                relative_path,
                is_image: kind == MediaKind::Image,
                is_video: kind == MediaKind::Video,
                size,
                modified_at,
                extension,
            });
        }

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok(entries)
    }
}

/// 列表路径的规范显示形式：以 `/` 开头，不以 `/` 结尾。
pub fn normalize_display_path(relative: &str) -> String {
    let segments: Vec<&str> = relative
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

/// 显示路径的上级目录；根目录的上级仍是根目录。
pub fn parent_display_path(current: &str) -> String {
    let trimmed = current.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => trimmed[..index].to_string(),
    }
}

pub fn format_timestamp(unix_secs: i64) -> String {
    if unix_secs <= 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp(unix_secs, 0)
        .map(|datetime| {
            datetime
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::InvalidPath => f.write_str("invalid path"),
            StorageError::Io(err) => write!(f, "{err}"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub relative_path: String,
    pub is_image: bool,
    pub is_video: bool,
    pub size: u64,
    pub modified_at: i64,
    pub extension: String,
}

#[cfg(test)]
mod tests {
    use super::{Storage, StorageError, normalize_display_path, parent_display_path};
    use std::io::ErrorKind;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(&root).expect("create root");
        (temp, Storage::new(root))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_path_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage();
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        symlink(&outside, storage.root_path().join("link")).expect("symlink");

        let result = storage.resolve_path_checked("link", false).await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));

        let following = storage.clone().with_follow_symlinks(true);
        assert!(following.resolve_path_checked("link", false).await.is_ok());
    }

    #[tokio::test]
    async fn resolve_path_rejects_traversal() {
        let (_temp, storage) = make_storage();
        let result = storage.resolve_path_checked("../etc", true).await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
        let result = storage.resolve_path_checked_blocking("a/../../b");
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }

    #[tokio::test]
    async fn list_dir_returns_every_entry_with_classification() {
        let (_temp, storage) = make_storage();
        let root = storage.root_path();
        std::fs::create_dir(root.join("Albums")).expect("mkdir");
        std::fs::write(root.join("HOLIDAY.JPG"), b"jpg").expect("write");
        std::fs::write(root.join("clip.webm"), b"webm").expect("write");
        std::fs::write(root.join("notes.txt"), b"hello").expect("write");
        std::fs::write(root.join("README"), b"").expect("write");

        let entries = storage.list_dir("/").await.expect("list root");
        let mut names: Vec<_> = entries.iter().map(|entry| entry.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec!["Albums", "HOLIDAY.JPG", "README", "clip.webm", "notes.txt"]
        );

        let find = |name: &str| {
            entries
                .iter()
                .find(|entry| entry.name == name)
                .expect("entry present")
        };
        let photo = find("HOLIDAY.JPG");
        assert!(photo.is_image && !photo.is_video);
        assert_eq!(photo.extension, "jpg");
        assert_eq!(photo.relative_path, "/HOLIDAY.JPG");

        let clip = find("clip.webm");
        assert!(clip.is_video && !clip.is_image);

        let notes = find("notes.txt");
        assert!(!notes.is_image && !notes.is_video && !notes.is_dir);
        assert_eq!(notes.size, 5);
        assert!(notes.modified_at > 0);

        assert!(find("Albums").is_dir);
        assert_eq!(find("README").extension, "");
    }

    #[tokio::test]
    async fn list_dir_sees_changes_between_calls() {
        let (_temp, storage) = make_storage();
        std::fs::create_dir(storage.root_path().join("sub")).expect("mkdir");
        assert!(storage.list_dir("sub").await.expect("list").is_empty());

        std::fs::write(storage.root_path().join("sub/new.png"), b"x").expect("write");
        let entries = storage.list_dir("/sub/").await.expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, "/sub/new.png");
    }

    #[tokio::test]
    async fn list_dir_missing_or_file_is_not_found() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("file.txt"), b"x").expect("write");

        for path in ["missing", "file.txt", "file.txt/inner"] {
            match storage.list_dir(path).await {
                Err(StorageError::Io(err)) => assert_eq!(err.kind(), ErrorKind::NotFound),
                other => panic!("unexpected result for {path}: {other:?}"),
            }
        }
    }

    #[test]
    fn display_paths_are_normalized() {
        assert_eq!(normalize_display_path(""), "/");
        assert_eq!(normalize_display_path("/"), "/");
        assert_eq!(normalize_display_path("a/b/"), "/a/b");
        assert_eq!(parent_display_path("/"), "/");
        assert_eq!(parent_display_path("/a"), "/");
        assert_eq!(parent_display_path("/a/b/"), "/a");
    }
}
