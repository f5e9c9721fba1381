//! 多文件上传：流式写入目标目录，逐个记录每个文件的处理结果。

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{Extension, Multipart, Query};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Json as JsonResponse, Redirect, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::atomic::AtomicFile;
use crate::config::UPLOAD_FIELD_NAME;
use crate::error::ApiError;
use crate::http::encode_path;
use crate::storage::{Storage, normalize_display_path};

#[derive(Deserialize)]
pub(crate) struct UploadQuery {
    #[serde(default)]
    path: String,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UploadOutcome {
    Stored { bytes: u64 },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEntry {
    pub file_name: String,
    #[serde(flatten)]
    pub outcome: UploadOutcome,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub target: String,
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub entries: Vec<UploadEntry>,
}

impl UploadReport {
    fn new(target: String) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    fn record(&mut self, file_name: String, outcome: UploadOutcome) {
        match &outcome {
            UploadOutcome::Stored { .. } => self.stored += 1,
            UploadOutcome::Skipped { .. } => self.skipped += 1,
            UploadOutcome::Failed { .. } => self.failed += 1,
        }
        self.entries.push(UploadEntry { file_name, outcome });
    }
}

/// 接收 `myFile` 字段下的所有文件；单个文件失败不影响其余文件。
pub async fn upload_files(
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let view_path = normalize_display_path(&query.path);
    let target_dir = storage.resolve_path_checked(&query.path, false).await?;
    let metadata = fs::metadata(&target_dir).await.map_err(|err| {
        ApiError::NotFound(format!("upload target {view_path}: {err}"))
    })?;
    if !metadata.is_dir() {
        return Err(ApiError::NotFound(format!(
            "upload target {view_path} is not a directory"
        )));
    }

    let wants_json = accepts_json(&headers);
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            warn!(path = %view_path, error = %rejection, "invalid upload form");
            return Ok(finish(view_path, None, wants_json));
        }
    };

    let mut report = UploadReport::new(view_path.clone());
    let mut file_parts = 0usize;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!(path = %view_path, error = %err, "multipart stream aborted");
                if file_parts == 0 {
                    return Ok(finish(view_path, None, wants_json));
                }
                break;
            }
        };
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }
        let Some(file_name) = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
        else {
            continue;
        };
        file_parts += 1;

        let outcome = store_part(&target_dir, &file_name, field).await;
        match &outcome {
            UploadOutcome::Stored { bytes } => {
                info!(path = %view_path, file = %file_name, bytes, "upload stored")
            }
            UploadOutcome::Skipped { reason } => {
                debug!(path = %view_path, file = %file_name, reason = %reason, "upload skipped")
            }
            UploadOutcome::Failed { reason } => {
                warn!(path = %view_path, file = %file_name, reason = %reason, "upload failed")
            }
        }
        report.record(file_name, outcome);
    }

    if file_parts == 0 {
        return Ok(finish(view_path, None, wants_json));
    }
    info!(
        path = %view_path,
        stored = report.stored,
        skipped = report.skipped,
        failed = report.failed,
        "upload finished"
    );
    Ok(finish(view_path, Some(report), wants_json))
}

/// 表单无效或没有文件时回到列表页并带上 `error=empty`。
fn finish(view_path: String, report: Option<UploadReport>, wants_json: bool) -> Response {
    let location = format!("/view{}", encode_path(&view_path));
    match (report, wants_json) {
        (report, true) => {
            JsonResponse(report.unwrap_or_else(|| UploadReport::new(view_path))).into_response()
        }
        (Some(_), false) => Redirect::to(&location).into_response(),
        (None, false) => Redirect::to(&format!("{location}?error=empty")).into_response(),
    }
}

async fn store_part(target_dir: &Path, file_name: &str, mut field: Field<'_>) -> UploadOutcome {
    if let Err(reason) = validate_file_name(file_name) {
        return UploadOutcome::Skipped {
            reason: reason.to_string(),
        };
    }

    let mut file = match AtomicFile::create(&target_dir.join(file_name)).await {
        Ok(file) => file,
        Err(err) => {
            return UploadOutcome::Failed {
                reason: err.to_string(),
            };
        }
    };
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(err) = file.write_chunk(&chunk).await {
                    file.discard().await;
                    return UploadOutcome::Failed {
                        reason: err.to_string(),
                    };
                }
            }
            Ok(None) => break,
            Err(err) => {
                file.discard().await;
                return UploadOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        }
    }

    if file.written() == 0 {
        file.discard().await;
        return UploadOutcome::Skipped {
            reason: "empty file".into(),
        };
    }
    match file.commit().await {
        Ok(bytes) => UploadOutcome::Stored { bytes },
        Err(err) => UploadOutcome::Failed {
            reason: err.to_string(),
        },
    }
}

/// 上传文件名只能是单个路径段。
pub fn validate_file_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() || name == "." || name == ".." {
        return Err("invalid file name");
    }
    if name.contains(['/', '\\', '\0']) {
        return Err("file name contains a path separator");
    }
    Ok(())
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}
