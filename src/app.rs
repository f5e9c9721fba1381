//! 路由组装：路由表、共享组件与中间件栈。

use axum::body::Body as AxumBody;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::response::{Redirect, Response};
use axum::routing::{get, post};
use axum::{Router, middleware};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;

use crate::error::ApiError;
use crate::http::{add_security_headers, build_cors_layer, build_trace_layer, recover_panic};
use crate::page::PageRenderer;
use crate::storage::Storage;
use crate::thumbnail::Thumbnailer;
use crate::{archive, frontend, page, thumbnail, upload, version};

pub struct AppParts {
    pub storage: Arc<Storage>,
    pub thumbnailer: Arc<Thumbnailer>,
    pub renderer: Arc<PageRenderer>,
    /// 为 0 时 `/upload` 不限制请求体大小。
    pub upload_max_size: u64,
    pub cors_origins: Option<String>,
}

pub fn build_router(parts: AppParts) -> Router {
    let upload_limit = if parts.upload_max_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(usize::try_from(parts.upload_max_size).unwrap_or(usize::MAX))
    };

    let mut app = Router::new()
        .route("/", get(|| async { Redirect::to("/view/") }))
        .route("/view", get(|| async { Redirect::to("/view/") }))
        .route("/view/", get(page::view_root))
        .route("/view/{*path}", get(page::view_path))
        .route("/thumb/{*path}", get(thumbnail::thumbnail))
        .nest("/download", download_router(&parts.storage))
        .route("/upload", post(upload::upload_files).layer(upload_limit))
        .route("/zip", get(archive::download_zip))
        .route("/static/{*path}", get(frontend::serve_static))
        .route("/api/version", get(version::get_version_info))
        .route("/panic", get(trigger_panic))
        .layer(CatchPanicLayer::custom(recover_panic))
        .layer(middleware::from_fn(add_security_headers))
        .layer(build_trace_layer())
        .layer(Extension(parts.storage))
        .layer(Extension(parts.thumbnailer))
        .layer(Extension(parts.renderer));

    if let Some(cors_layer) = build_cors_layer(parts.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }
    app
}

/// 原始文件下载（支持 Range）。`ServeDir` 自身会跟随符号链接，
/// 因此先按存储的路径策略校验。
fn download_router(storage: &Storage) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(storage.root_path()))
        .layer(middleware::from_fn(guard_download_path))
}

async fn guard_download_path(
    Extension(storage): Extension<Arc<Storage>>,
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let path = percent_decode_str(request.uri().path())
        .decode_utf8_lossy()
        .to_string();
    storage.resolve_path_checked(&path, true).await?;
    Ok(next.run(request).await)
}

/// 用于验证 panic 恢复层的诊断路由。
async fn trigger_panic() {
    panic!("Manual panic triggered");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnail::{FrameExtractor, ThumbnailError};
    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use axum::http::{HeaderValue, Request, StatusCode, header};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use std::path::Path;
    use tower::ServiceExt;

    struct NoFrames;

    #[async_trait]
    impl FrameExtractor for NoFrames {
        async fn extract_frame(&self, _source: &Path) -> Result<Vec<u8>, ThumbnailError> {
            Err(ThumbnailError::ExtractorFailed("disabled in tests".into()))
        }
    }

    fn make_app() -> (tempfile::TempDir, Router) {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(root.join("Pictures")).expect("create root");
        std::fs::write(root.join("hello.txt"), b"hello world").expect("write");
        std::fs::write(root.join("Pictures/cat.JPG"), b"jpg").expect("write");
        let app = build_router(AppParts {
            storage: Arc::new(Storage::new(root)),
            thumbnailer: Arc::new(Thumbnailer::new(Arc::new(NoFrames), 1)),
            renderer: Arc::new(PageRenderer::new().expect("template")),
            upload_max_size: 0,
            cors_origins: None,
        });
        (temp, app)
    }

    async fn get_response(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(AxumBody::empty()).expect("request"))
            .await
            .expect("response")
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[tokio::test]
    async fn root_redirects_to_listing() {
        let (_temp, app) = make_app();
        let response = get_response(&app, "/").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION),
            Some(&HeaderValue::from_static("/view/"))
        );
    }

    #[tokio::test]
    async fn listing_renders_entries_and_disk_usage() {
        let (_temp, app) = make_app();
        let response = get_response(&app, "/view/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::X_FRAME_OPTIONS),
            Some(&HeaderValue::from_static("DENY"))
        );
        let html = body_text(response).await;
        assert!(html.contains("hello.txt"));
        assert!(html.contains("/view/Pictures"));
        assert!(html.contains("GB &#x2f; "));

        let html = body_text(get_response(&app, "/view/Pictures").await).await;
        assert!(html.contains("/thumb/Pictures/cat.JPG"));
    }

    #[tokio::test]
    async fn listing_errors_map_to_status_codes() {
        let (_temp, app) = make_app();
        assert_eq!(
            get_response(&app, "/view/nope").await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_response(&app, "/view/hello.txt").await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_response(&app, "/view/%2E%2E/secret").await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn panic_route_is_recovered_and_server_keeps_serving() {
        let (_temp, app) = make_app();
        let response = get_response(&app, "/panic").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = get_response(&app, "/view/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = get_response(&app, "/download/hello.txt").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn download_serves_raw_bytes_and_ranges() {
        let (_temp, app) = make_app();
        let response = get_response(&app, "/download/hello.txt").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "hello world");

        let request = Request::builder()
            .uri("/download/hello.txt")
            .header(header::RANGE, "bytes=6-10")
            .body(AxumBody::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_text(response).await, "world");

        assert_eq!(
            get_response(&app, "/download/missing.txt").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn download_refuses_symlinks_out_of_root() {
        let (temp, app) = make_app();
        let outside = temp.path().join("secret.txt");
        std::fs::write(&outside, b"secret").expect("write");
        std::os::unix::fs::symlink(&outside, temp.path().join("root/leak.txt")).expect("symlink");

        let response = get_response(&app, "/download/leak.txt").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn static_assets_and_version_are_served() {
        let (_temp, app) = make_app();
        assert_eq!(
            get_response(&app, "/static/style.css").await.status(),
            StatusCode::OK
        );
        let response = get_response(&app, "/api/version").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"version\""));
    }

    #[tokio::test]
    async fn zip_without_paths_is_bad_request() {
        let (_temp, app) = make_app();
        assert_eq!(
            get_response(&app, "/zip").await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn video_thumbnail_failure_is_reported_as_server_error() {
        let (temp, app) = make_app();
        std::fs::write(temp.path().join("root/movie.mov"), b"mov").expect("write");
        assert_eq!(
            get_response(&app, "/thumb/movie.mov").await.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_response(&app, "/thumb/absent.mov").await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
