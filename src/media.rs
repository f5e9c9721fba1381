//! 基于扩展名的媒体类型判断。

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// 对已转小写、不带点的扩展名分类。
    pub fn from_extension(extension: &str) -> Self {
        if IMAGE_EXTENSIONS.contains(&extension) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&extension) {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }

    pub fn from_name(name: &str) -> Self {
        Self::from_extension(&extension_of(name))
    }
}

/// 最后一个路径段中最后一个 `.` 之后的小写后缀。
pub fn extension_of(name: &str) -> String {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file_name.rfind('.') {
        Some(index) if index > 0 => file_name[index + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}
