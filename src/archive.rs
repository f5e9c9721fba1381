//! 所选文件的 zip 打包，边写边流式发送给客户端。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::Query;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Seek, Write};
use std::sync::Arc;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tracing::{debug, info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::config::{ZIP_BUNDLE_NAME, ZIP_PIPE_CAPACITY};
use crate::error::ApiError;
use crate::storage::Storage;

#[derive(Deserialize)]
pub(crate) struct ZipQuery {
    #[serde(default)]
    p: Vec<String>,
}

#[derive(Debug, PartialEq)]
pub enum ArchiveOutcome {
    Added { entry_name: String, bytes: u64 },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Default)]
pub struct ArchiveReport {
    pub entries: Vec<(String, ArchiveOutcome)>,
}

impl ArchiveReport {
    pub fn added(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ArchiveOutcome::Added { .. }))
            .count()
    }
}

#[derive(Debug)]
pub enum ArchiveError {
    Zip(zip::result::ZipError),
    Io(io::Error),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        ArchiveError::Zip(err)
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io(err)
    }
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Zip(err) => write!(f, "zip: {err}"),
            ArchiveError::Io(err) => write!(f, "io: {err}"),
        }
    }
}

/// 将 `paths` 打包写入 `sink`，条目按文件名平铺。
/// 目录、不存在的文件和重复文件名会被跳过；写出端出错时中止整个归档，
/// 单个文件出错只影响该文件。阻塞调用。
pub fn write_archive<W: Write>(
    storage: &Storage,
    paths: &[String],
    sink: W,
) -> Result<ArchiveReport, ArchiveError> {
    let mut zip = ZipWriter::new_stream(sink);
    let mut report = ArchiveReport::default();
    let mut used_names = HashSet::new();

    for relative in paths {
        let outcome = add_entry(storage, relative, &mut zip, &mut used_names)?;
        report.entries.push((relative.clone(), outcome));
    }

    zip.finish()?.flush()?;
    Ok(report)
}

fn add_entry<Z: Write + Seek>(
    storage: &Storage,
    relative: &str,
    zip: &mut ZipWriter<Z>,
    used_names: &mut HashSet<String>,
) -> Result<ArchiveOutcome, ArchiveError> {
    let target = match storage.resolve_path_checked_blocking(relative) {
        Ok(target) => target,
        Err(err) => {
            return Ok(ArchiveOutcome::Skipped {
                reason: err.to_string(),
            });
        }
    };
    let metadata = match std::fs::metadata(&target) {
        Ok(metadata) => metadata,
        Err(err) => {
            return Ok(ArchiveOutcome::Skipped {
                reason: err.to_string(),
            });
        }
    };
    if metadata.is_dir() {
        return Ok(ArchiveOutcome::Skipped {
            reason: "directory".into(),
        });
    }
    let Some(entry_name) = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
    else {
        return Ok(ArchiveOutcome::Skipped {
            reason: "no file name".into(),
        });
    };
    if used_names.contains(&entry_name) {
        return Ok(ArchiveOutcome::Skipped {
            reason: "duplicate name".into(),
        });
    }
    let mut file = match File::open(&target) {
        Ok(file) => file,
        Err(err) => {
            return Ok(ArchiveOutcome::Failed {
                reason: err.to_string(),
            });
        }
    };

    let options = SimpleFileOptions::default().large_file(metadata.len() >= u32::MAX as u64);
    zip.start_file(entry_name.as_str(), options)?;
    used_names.insert(entry_name.clone());
    // 写完条目头之后读取失败会留下截断的条目，归档本身仍然有效
    match io::copy(&mut file, zip) {
        Ok(bytes) => Ok(ArchiveOutcome::Added { entry_name, bytes }),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Err(err.into()),
        Err(err) => Ok(ArchiveOutcome::Failed {
            reason: err.to_string(),
        }),
    }
}

/// 打包下载所选文件，边写边发送。
pub async fn download_zip(
    Query(query): Query<ZipQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let paths: Vec<String> = query
        .p
        .into_iter()
        .filter(|path| !path.trim().is_empty())
        .collect();
    if paths.is_empty() {
        return Err(ApiError::BadRequest("No files selected".into()));
    }
    info!(count = paths.len(), "zip download");

    let (writer, reader) = tokio::io::duplex(ZIP_PIPE_CAPACITY);
    let sink = SyncIoBridge::new(writer);
    tokio::task::spawn_blocking(move || match write_archive(&storage, &paths, sink) {
        Ok(report) => {
            for (path, outcome) in &report.entries {
                debug!(path, outcome = ?outcome, "zip entry");
            }
            info!(
                requested = paths.len(),
                added = report.added(),
                "zip download finished"
            );
        }
        Err(err) => warn!(error = %err, "zip download aborted"),
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename={ZIP_BUNDLE_NAME}"))
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    Ok((
        StatusCode::OK,
        headers,
        AxumBody::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::Request;
    use axum::routing::get;
    use http_body_util::BodyExt;
    use std::io::{Cursor, Read};
    use tower::ServiceExt;
    use zip::ZipArchive;

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(root.join("subdir")).expect("create root");
        std::fs::write(root.join("a.txt"), b"alpha contents").expect("write");
        std::fs::write(root.join("subdir/a.txt"), b"shadowed").expect("write");
        std::fs::write(root.join("subdir/b.bin"), [7u8; 4096]).expect("write");
        (temp, Arc::new(Storage::new(root)))
    }

    fn read_entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
        (0..archive.len())
            .map(|index| {
                let mut file = archive.by_index(index).expect("entry");
                let mut content = Vec::new();
                file.read_to_end(&mut content).expect("read entry");
                (file.name().to_string(), content)
            })
            .collect()
    }

    #[test]
    fn skips_missing_files_and_directories() {
        let (_temp, storage) = make_storage();
        let paths = vec![
            "a.txt".to_string(),
            "missing.txt".to_string(),
            "subdir/".to_string(),
        ];
        let mut buffer = Vec::new();
        let report = write_archive(&storage, &paths, &mut buffer).expect("archive");

        assert_eq!(report.added(), 1);
        assert!(matches!(
            report.entries[1].1,
            ArchiveOutcome::Skipped { .. }
        ));
        assert_eq!(
            report.entries[2].1,
            ArchiveOutcome::Skipped {
                reason: "directory".into()
            }
        );
        assert_eq!(
            read_entries(buffer),
            vec![("a.txt".to_string(), b"alpha contents".to_vec())]
        );
    }

    #[test]
    fn flattens_names_and_keeps_first_duplicate() {
        let (_temp, storage) = make_storage();
        let paths = vec![
            "/a.txt".to_string(),
            "subdir/a.txt".to_string(),
            "subdir/b.bin".to_string(),
            "../outside".to_string(),
        ];
        let mut buffer = Vec::new();
        let report = write_archive(&storage, &paths, &mut buffer).expect("archive");
        assert_eq!(
            report.entries[1].1,
            ArchiveOutcome::Skipped {
                reason: "duplicate name".into()
            }
        );
        assert!(matches!(
            report.entries[3].1,
            ArchiveOutcome::Skipped { .. }
        ));

        let entries = read_entries(buffer);
        let names: Vec<_> = entries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.bin"]);
        assert_eq!(entries[0].1, b"alpha contents");
        assert_eq!(entries[1].1, vec![7u8; 4096]);
    }

    fn app(storage: Arc<Storage>) -> Router {
        Router::new()
            .route("/zip", get(download_zip))
            .layer(Extension(storage))
    }

    #[tokio::test]
    async fn streams_zip_over_http() {
        let (_temp, storage) = make_storage();
        let request = Request::builder()
            .uri("/zip?p=a.txt&p=missing.txt&p=subdir%2F")
            .body(AxumBody::empty())
            .expect("request");
        let response = app(storage).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/zip"))
        );
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes()
            .to_vec();
        assert_eq!(
            read_entries(bytes),
            vec![("a.txt".to_string(), b"alpha contents".to_vec())]
        );
    }

    #[tokio::test]
    async fn no_paths_is_bad_request() {
        let (_temp, storage) = make_storage();
        let request = Request::builder()
            .uri("/zip")
            .body(AxumBody::empty())
            .expect("request");
        let response = app(storage).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
