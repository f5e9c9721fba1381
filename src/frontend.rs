//! 内置静态资源（样式与脚本）。

use axum::body::Body as AxumBody;
use axum::extract::Path;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

use crate::error::ApiError;

#[derive(RustEmbed)]
#[folder = "static"]
/// 编译期嵌入的 UI 资源。
pub struct StaticAssets;

/// `/static/{*path}` 资源处理器。
pub async fn serve_static(Path(path): Path<String>) -> Result<Response, ApiError> {
    load_embedded_asset(path.trim_start_matches('/'))?
        .ok_or_else(|| ApiError::NotFound("not found".into()))
}

/// 加载指定路径的嵌入式资源。
fn load_embedded_asset(path: &str) -> Result<Option<Response>, ApiError> {
    let Some(asset) = StaticAssets::get(path) else {
        return Ok(None);
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=300"),
    );
    Ok(Some(
        (headers, AxumBody::from(asset.data.into_owned())).into_response(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn serves_bundled_script_with_mime() {
        let response = serve_static(Path("script.js".to_string()))
            .await
            .expect("asset");
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.contains("javascript"));
    }

    #[tokio::test]
    async fn unknown_asset_is_not_found() {
        let result = serve_static(Path("missing.css".to_string())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
