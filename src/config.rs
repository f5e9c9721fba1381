//! 命令行参数与服务默认配置。

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

pub const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const THUMBNAIL_SIZE: u32 = 150;
pub const THUMBNAIL_JPEG_QUALITY: u8 = 85;
pub const THUMBNAIL_MAX_AGE_SECS: u64 = 60 * 60;
pub const VIDEO_SEEK_SECS: u32 = 1;
pub const UPLOAD_FIELD_NAME: &str = "myFile";
pub const ZIP_BUNDLE_NAME: &str = "invifiles_bundle.zip";
pub const ZIP_PIPE_CAPACITY: usize = 64 * 1024;
pub const FAREWELL_MESSAGE: &str = "bye bye :(";
pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 0;
pub const DEFAULT_VIDEO_THUMB_CONCURRENCY: usize = 4;
pub const DEFAULT_VIDEO_THUMB_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 500;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// 服务的命令行参数与环境变量配置。
#[derive(Parser, Debug, Clone)]
#[command(
    name = "invifiles",
    version = VERSION_INFO,
    about = "Browse, preview, zip and upload files on the local network"
)]
pub struct Args {
    #[arg(
        env = "INVIFILES_ROOT",
        default_value = ".",
        help = "Directory to serve"
    )]
    pub root: String,
    #[arg(
        short = 'b',
        long,
        env = "INVIFILES_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "INVIFILES_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(long, env = "INVIFILES_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "INVIFILES_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "INVIFILES_FOLLOW_SYMLINKS",
        help = "Allow paths that traverse symbolic links"
    )]
    pub follow_symlinks: bool,
    #[arg(
        long,
        env = "INVIFILES_FFMPEG",
        default_value = "ffmpeg",
        help = "ffmpeg binary used for video thumbnails"
    )]
    pub ffmpeg: String,
    #[arg(
        long,
        env = "INVIFILES_VIDEO_THUMB_CONCURRENCY",
        default_value_t = DEFAULT_VIDEO_THUMB_CONCURRENCY,
        help = "Max concurrent video frame extractions"
    )]
    pub video_thumb_concurrency: usize,
    #[arg(
        long,
        env = "INVIFILES_VIDEO_THUMB_TIMEOUT_SECS",
        default_value_t = DEFAULT_VIDEO_THUMB_TIMEOUT_SECS,
        help = "Video frame extraction timeout in seconds"
    )]
    pub video_thumb_timeout_secs: u64,
    #[arg(
        long,
        env = "INVIFILES_RESTART_ON_FAILURE",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Restart instead of exiting when the server fails to bind or serve"
    )]
    pub restart_on_failure: bool,
    #[arg(
        long,
        env = "INVIFILES_RESTART_DELAY_MS",
        default_value_t = DEFAULT_RESTART_DELAY_MS,
        help = "Pause before re-entering the serving loop"
    )]
    pub restart_delay_ms: u64,
    #[arg(
        long,
        env = "INVIFILES_SHUTDOWN_TIMEOUT_SECS",
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        help = "Grace period for in-flight requests on shutdown"
    )]
    pub shutdown_timeout_secs: u64,
    #[arg(
        long,
        env = "INVIFILES_LOG",
        default_value = "info",
        help = "Default log filter when RUST_LOG is unset"
    )]
    pub log: String,
}
