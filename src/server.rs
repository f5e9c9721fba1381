//! 单轮服务：绑定端口并提供服务，收到控制台命令或信号后排空退出。

use async_trait::async_trait;
use axum::Router;
use axum_server::Handle;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::console::{ConsoleCommand, RoundEnd, ServeRound};

pub struct HttpServer {
    app: Router,
    addr: SocketAddr,
    root_label: String,
    commands: mpsc::Receiver<ConsoleCommand>,
    commands_open: bool,
    shutdown_timeout: Duration,
}

impl HttpServer {
    pub fn new(
        app: Router,
        addr: SocketAddr,
        root_label: String,
        commands: mpsc::Receiver<ConsoleCommand>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            app,
            addr,
            root_label,
            commands,
            commands_open: true,
            shutdown_timeout,
        }
    }
}

#[async_trait]
impl ServeRound for HttpServer {
    async fn serve_round(&mut self) -> RoundEnd {
        let handle = Handle::new();
        let serve = axum_server::bind(self.addr)
            .handle(handle.clone())
            .serve(
                self.app
                    .clone()
                    .into_make_service_with_connect_info::<SocketAddr>(),
            );
        let mut server = tokio::spawn(serve);

        info!("🚀 Starting HTTP server at {}", self.addr);
        println!(
            ":) Serving {} on http://localhost:{}\nPress r and hit enter to restart and q to quit",
            self.root_label,
            self.addr.port()
        );

        let command = loop {
            tokio::select! {
                result = &mut server => {
                    let err = match result {
                        Ok(Ok(())) => io::Error::other("server stopped unexpectedly"),
                        Ok(Err(err)) => err,
                        Err(join_err) => io::Error::other(join_err.to_string()),
                    };
                    return RoundEnd::Failed(err);
                }
                received = self.commands.recv(), if self.commands_open => match received {
                    Some(command) => break command,
                    None => {
                        self.commands_open = false;
                        debug!("console closed; only signals can stop the server now");
                    }
                },
                _ = shutdown_signal() => break ConsoleCommand::Quit,
            }
        };

        info!(?command, "shutting down HTTP server");
        handle.graceful_shutdown(Some(self.shutdown_timeout));
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "server error during shutdown"),
            Err(err) => warn!(error = %err, "server task failed during shutdown"),
        }
        RoundEnd::Command(command)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
}
