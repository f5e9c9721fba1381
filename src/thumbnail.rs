//! 150×150 JPEG 缩略图：图片在进程内解码，视频由外部抽帧工具
//! （默认 ffmpeg）截取一帧。

use async_trait::async_trait;
use axum::extract::{Extension, Path as UrlPath};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use image::ImageReader;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{
    THUMBNAIL_JPEG_QUALITY, THUMBNAIL_MAX_AGE_SECS, THUMBNAIL_SIZE, VIDEO_SEEK_SECS,
};
use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::media::MediaKind;
use crate::storage::Storage;

#[derive(Debug)]
pub enum ThumbnailError {
    /// 源文件无法打开或解码。
    SourceUnavailable(String),
    /// 抽帧工具已运行但没有产出画面。
    ExtractorFailed(String),
    Internal(String),
}

impl From<ThumbnailError> for ApiError {
    fn from(error: ThumbnailError) -> Self {
        match error {
            ThumbnailError::SourceUnavailable(msg) => ApiError::NotFound(msg),
            ThumbnailError::ExtractorFailed(msg) => {
                ApiError::Internal(format!("thumbnail unavailable: {msg}"))
            }
            ThumbnailError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

/// 从视频中取出一帧已缩放裁剪到缩略图尺寸的 JPEG。
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_frame(&self, source: &Path) -> Result<Vec<u8>, ThumbnailError>;
}

pub struct FfmpegExtractor {
    binary: String,
    timeout: Duration,
}

impl FfmpegExtractor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command(&self, source: &Path) -> Command {
        let filter = format!(
            "scale={size}:{size}:force_original_aspect_ratio=increase,crop={size}:{size}",
            size = THUMBNAIL_SIZE
        );
        let mut command = Command::new(&self.binary);
        command
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(VIDEO_SEEK_SECS.to_string())
            .arg("-i")
            .arg(source)
            .args(["-frames:v", "1", "-vf", &filter])
            .args(["-f", "image2", "-c:v", "mjpeg", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract_frame(&self, source: &Path) -> Result<Vec<u8>, ThumbnailError> {
        let output = tokio::time::timeout(self.timeout, self.command(source).output())
            .await
            .map_err(|_| ThumbnailError::ExtractorFailed("frame extraction timed out".into()))?
            .map_err(|err| {
                ThumbnailError::ExtractorFailed(format!("failed to run {}: {err}", self.binary))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ThumbnailError::ExtractorFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(ThumbnailError::ExtractorFailed("no frame produced".into()));
        }
        Ok(output.stdout)
    }
}

pub struct Thumbnailer {
    extractor: Arc<dyn FrameExtractor>,
    video_slots: Option<Semaphore>,
}

impl Thumbnailer {
    /// `max_concurrent_videos == 0` 时不限制视频抽帧并发。
    pub fn new(extractor: Arc<dyn FrameExtractor>, max_concurrent_videos: usize) -> Self {
        Self {
            extractor,
            video_slots: (max_concurrent_videos > 0).then(|| Semaphore::new(max_concurrent_videos)),
        }
    }

    pub async fn generate(&self, source: PathBuf) -> Result<Vec<u8>, ThumbnailError> {
        match MediaKind::from_name(&source.to_string_lossy()) {
            MediaKind::Video => self.video_frame(&source).await,
            MediaKind::Image | MediaKind::Other => {
                tokio::task::spawn_blocking(move || render_image_thumbnail(&source))
                    .await
                    .map_err(|err| ThumbnailError::Internal(err.to_string()))?
            }
        }
    }

    async fn video_frame(&self, source: &Path) -> Result<Vec<u8>, ThumbnailError> {
        let _permit = match &self.video_slots {
            Some(slots) => Some(
                slots
                    .acquire()
                    .await
                    .map_err(|err| ThumbnailError::Internal(err.to_string()))?,
            ),
            None => None,
        };
        self.extractor.extract_frame(source).await
    }
}

/// 解码、填充并居中裁剪到缩略图尺寸后编码为 JPEG。阻塞调用。
pub fn render_image_thumbnail(source: &Path) -> Result<Vec<u8>, ThumbnailError> {
    let image = ImageReader::open(source)
        .map_err(|err| ThumbnailError::SourceUnavailable(err.to_string()))?
        .with_guessed_format()
        .map_err(|err| ThumbnailError::SourceUnavailable(err.to_string()))?
        .decode()
        .map_err(|err| ThumbnailError::SourceUnavailable(err.to_string()))?;

    let thumb = image
        .resize_to_fill(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3)
        .to_rgb8();
    let mut buffer = Vec::new();
    thumb
        .write_with_encoder(JpegEncoder::new_with_quality(
            &mut buffer,
            THUMBNAIL_JPEG_QUALITY,
        ))
        .map_err(|err| ThumbnailError::Internal(err.to_string()))?;
    Ok(buffer)
}

/// 返回文件缩略图，带 ETag 协商缓存。
pub async fn thumbnail(
    UrlPath(path): UrlPath<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(thumbnailer): Extension<Arc<Thumbnailer>>,
) -> Result<Response, ApiError> {
    let target = storage.resolve_path_checked(&path, false).await?;
    let metadata = fs::metadata(&target).await.map_err(|err| {
        debug!(path, error = %err, "thumbnail source missing");
        ApiError::NotFound("File not found".into())
    })?;
    if metadata.is_dir() {
        return Err(ApiError::NotFound("File not found".into()));
    }

    let etag = etag_from_metadata(&metadata);
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_str(&format!("private, max-age={THUMBNAIL_MAX_AGE_SECS}"))
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }

    if is_not_modified(&request_headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let jpeg = thumbnailer.generate(target).await.map_err(|err| {
        warn!(path, error = ?err, "thumbnail generation failed");
        ApiError::from(err)
    })?;
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    Ok((StatusCode::OK, response_headers, jpeg).into_response())
}
