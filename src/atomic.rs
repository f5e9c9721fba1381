//! 上传落盘：先写同目录临时文件，完成后重命名覆盖目标。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 写入完成前对外不可见的临时文件。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
    written: u64,
}

impl AtomicFile {
    /// 在目标路径同目录创建隐藏的临时文件。
    pub async fn create(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "upload".into());
        let temp_path = parent.join(format!(".{base}.part.{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 放弃并清理临时文件。
    pub async fn discard(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 刷盘后重命名为目标文件，已存在的同名文件被替换。
    pub async fn commit(mut self) -> io::Result<u64> {
        let flushed = async {
            self.file.flush().await?;
            self.file.sync_all().await
        }
        .await;
        if let Err(err) = flushed {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok()
                    && fs::rename(&self.temp_path, &self.target).await.is_ok()
                {
                    return Ok(self.written);
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        Ok(self.written)
    }
}
