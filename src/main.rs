//! InviFiles 服务端入口。
//!
//! 通过 HTTP 将一个目录树发布为可浏览的页面，提供缩略图、上传、
//! 原始下载与 zip 打包。控制台输入 `r` 重启监听，输入 `q` 退出。

mod app;
mod archive;
mod atomic;
mod config;
mod console;
mod disk;
mod error;
mod etag;
mod frontend;
mod http;
mod logging;
mod media;
mod page;
mod server;
mod storage;
mod thumbnail;
mod upload;
mod version;

use clap::Parser;
use shadow_rs::shadow;
use std::io::{self, BufReader};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::app::{AppParts, build_router};
use crate::config::{Args, FAREWELL_MESSAGE};
use crate::page::PageRenderer;
use crate::server::HttpServer;
use crate::storage::Storage;
use crate::thumbnail::{FfmpegExtractor, Thumbnailer};

shadow!(build);

/// 启动 InviFiles 并阻塞到操作者退出。
#[tokio::main]
async fn main() -> Result<(), io::Error> {
    let args = Args::parse();
    logging::init_logging(&args.log);
    info!(version = build::PKG_VERSION, commit = build::SHORT_COMMIT, "InviFiles starting");

    let root = std::fs::canonicalize(&args.root)?;
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", root.display()),
        ));
    }

    let storage = Arc::new(Storage::new(root.clone()).with_follow_symlinks(args.follow_symlinks));
    let extractor = Arc::new(FfmpegExtractor::new(
        args.ffmpeg.clone(),
        Duration::from_secs(args.video_thumb_timeout_secs),
    ));
    let thumbnailer = Arc::new(Thumbnailer::new(extractor, args.video_thumb_concurrency));
    let renderer = Arc::new(PageRenderer::new().map_err(|err| io::Error::other(err.to_string()))?);

    let app = build_router(AppParts {
        storage,
        thumbnailer,
        renderer,
        upload_max_size: args.upload_max_size,
        cors_origins: args.cors_origins.clone(),
    });

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);

    let (commands, _console_thread) = console::spawn_console_reader(BufReader::new(io::stdin()))?;
    let mut server = HttpServer::new(
        app,
        addr,
        root.display().to_string(),
        commands,
        Duration::from_secs(args.shutdown_timeout_secs),
    );

    console::supervise(
        &mut server,
        args.restart_on_failure,
        Duration::from_millis(args.restart_delay_ms),
    )
    .await?;

    println!("{FAREWELL_MESSAGE}");
    Ok(())
}
