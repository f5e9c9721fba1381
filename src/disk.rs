//! 服务根目录所在文件系统的磁盘占用。

use serde::Serialize;
use std::io;
use std::path::Path;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiskUsage {
    pub used_percent: f64,
    pub label: String,
}

impl DiskUsage {
    /// 已用空间按 `total - free` 计算，保留块也算作已用。
    pub fn from_space(total: u64, free: u64) -> Self {
        let used = total.saturating_sub(free);
        let used_percent = if total == 0 {
            0.0
        } else {
            (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };
        Self {
            used_percent,
            label: format!("{:.1}GB / {:.1}GB", used as f64 / GIB, total as f64 / GIB),
        }
    }
}

/// 对 `path` 本身做 statvfs 查询（阻塞调用）。
pub fn disk_usage(path: &Path) -> io::Result<DiskUsage> {
    let stats = fs4::statvfs(path)?;
    Ok(DiskUsage::from_space(stats.total_space(), stats.free_space()))
}
