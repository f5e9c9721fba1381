//! 目录列表页：目录项与磁盘占用通过 `index.html` 模板渲染。

use axum::extract::{Extension, Path, Query};
use axum::response::Html;
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::disk::{DiskUsage, disk_usage};
use crate::error::ApiError;
use crate::http::{encode_path, encode_query_value};
use crate::storage::{
    FileEntry, Storage, format_timestamp, normalize_display_path, parent_display_path,
};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

#[derive(Debug, Serialize)]
pub struct PageView {
    pub current_path: String,
    pub parent_path: String,
    pub parent_href: String,
    pub upload_query: String,
    pub entries: Vec<EntryView>,
    pub disk_used_percent: f64,
    pub disk_used_label: String,
    pub notice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: FileEntry,
    pub href: String,
    pub size_label: String,
    pub modified_label: String,
}

impl From<FileEntry> for EntryView {
    fn from(entry: FileEntry) -> Self {
        Self {
            href: encode_path(&entry.relative_path),
            size_label: if entry.is_dir {
                "-".to_string()
            } else {
                format_size(entry.size)
            },
            modified_label: format_timestamp(entry.modified_at),
            entry,
        }
    }
}

impl PageView {
    pub fn new(current: &str, entries: Vec<FileEntry>, disk: DiskUsage) -> Self {
        let current_path = normalize_display_path(current);
        let parent_path = parent_display_path(&current_path);
        Self {
            parent_href: encode_path(&parent_path),
            upload_query: encode_query_value(&current_path),
            parent_path,
            current_path,
            entries: entries.into_iter().map(EntryView::from).collect(),
            disk_used_percent: disk.used_percent,
            disk_used_label: disk.label,
            notice: None,
        }
    }
}

pub struct PageRenderer {
    env: Environment<'static>,
}

impl PageRenderer {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("index.html", INDEX_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn render(&self, view: &PageView) -> Result<String, ApiError> {
        let template = self.env.get_template("index.html")?;
        Ok(template.render(view)?)
    }
}

#[derive(Deserialize)]
pub(crate) struct ListingQuery {
    error: Option<String>,
}

/// `/view/` 根目录列表。
pub async fn view_root(
    query: Query<ListingQuery>,
    storage: Extension<Arc<Storage>>,
    renderer: Extension<Arc<PageRenderer>>,
) -> Result<Html<String>, ApiError> {
    render_listing(String::new(), query, storage, renderer).await
}

/// `/view/{*path}` 子目录列表。
pub async fn view_path(
    Path(path): Path<String>,
    query: Query<ListingQuery>,
    storage: Extension<Arc<Storage>>,
    renderer: Extension<Arc<PageRenderer>>,
) -> Result<Html<String>, ApiError> {
    render_listing(path, query, storage, renderer).await
}

async fn render_listing(
    path: String,
    Query(query): Query<ListingQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(renderer): Extension<Arc<PageRenderer>>,
) -> Result<Html<String>, ApiError> {
    let entries = storage.list_dir(&path).await?;
    info!(path, count = entries.len(), "list directory");

    let root = storage.root_path().to_path_buf();
    let disk = tokio::task::spawn_blocking(move || disk_usage(&root))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .unwrap_or_else(|err| {
            warn!(error = %err, "disk usage unavailable");
            DiskUsage::from_space(0, 0)
        });
    debug!(percent = disk.used_percent, label = %disk.label, "disk usage");

    let mut view = PageView::new(&path, entries, disk);
    if query.error.as_deref() == Some("empty") {
        view.notice = Some("Can't upload empty file");
    }
    renderer.render(&view).map(Html)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
