//! 缩略图的 ETag 计算与条件请求判断。

use axum::http::{HeaderMap, header};
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// 根据源文件大小与修改时间生成弱 ETag，缩略图内容只取决于这两者。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    if let Ok(modified) = metadata.modified()
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"thumb-{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"thumb-{}\"", size)
}

/// `If-None-Match` 是否命中当前 ETag（含 `*`）。
pub fn is_not_modified(headers: &HeaderMap, current_etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    value
        .split(',')
        .map(str::trim)
        .any(|item| item == "*" || weak_eq(item, current_etag))
}

fn weak_eq(left: &str, right: &str) -> bool {
    left.trim_start_matches("W/") == right.trim_start_matches("W/")
}
