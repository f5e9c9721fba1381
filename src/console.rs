//! 控制台命令与服务生命周期。
//!
//! 标准输入由一个进程级读取线程负责，命令通过 channel 送到异步侧；
//! `supervise` 根据命令与服务失败驱动 `ServerState` 状态机。

use async_trait::async_trait;
use std::io::{self, BufRead};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Restart,
    Quit,
}

/// `r` 重启，`q` 退出；忽略首尾空白。
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim() {
        "r" => Some(ConsoleCommand::Restart),
        "q" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// 启动读取线程。输入结束或接收端关闭时线程退出，channel 随之关闭。
///
/// 线程不会被 join：它可能一直阻塞在 `read_line` 上，进程退出时直接丢弃。
pub fn spawn_console_reader<R>(
    reader: R,
) -> io::Result<(mpsc::Receiver<ConsoleCommand>, JoinHandle<()>)>
where
    R: BufRead + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(4);
    let handle = std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let Some(command) = parse_command(&line) else {
                    debug!(line = line.trim(), "ignored console input");
                    continue;
                };
                if sender.blocking_send(command).is_err() {
                    break;
                }
            }
            debug!("console input closed");
        })?;
    Ok((receiver, handle))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Serving,
    /// 正在排空进行中的请求，命令决定之后的去向。
    ShuttingDown(ConsoleCommand),
    Restarting,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Command(ConsoleCommand),
    ServerFailed,
    ShutdownComplete,
    RestartDelayElapsed,
}

impl ServerState {
    pub fn next(self, event: LifecycleEvent, restart_on_failure: bool) -> Self {
        use ConsoleCommand::{Quit, Restart};
        use LifecycleEvent::*;
        use ServerState::*;

        match (self, event) {
            (Serving, Command(command)) => ShuttingDown(command),
            (Serving, ServerFailed) if restart_on_failure => ShuttingDown(Restart),
            (Serving, ServerFailed) => ShuttingDown(Quit),
            (ShuttingDown(Restart), ShutdownComplete) => Restarting,
            (ShuttingDown(Quit), ShutdownComplete) => Stopped,
            (Restarting, RestartDelayElapsed) => Serving,
            (state, _) => state,
        }
    }
}

/// 一轮服务的结束方式。只有服务任务完全停止后才会返回。
#[derive(Debug)]
pub enum RoundEnd {
    Command(ConsoleCommand),
    Failed(io::Error),
}

#[async_trait]
pub trait ServeRound: Send {
    async fn serve_round(&mut self) -> RoundEnd;
}

/// 循环驱动服务轮次直到退出。仅当某轮失败且未开启失败重启时返回错误。
pub async fn supervise<S>(
    rounds: &mut S,
    restart_on_failure: bool,
    restart_delay: Duration,
) -> io::Result<()>
where
    S: ServeRound + ?Sized,
{
    let mut state = ServerState::Serving;
    let mut fatal = None;

    loop {
        state = match state {
            ServerState::Serving => match rounds.serve_round().await {
                RoundEnd::Command(command) => {
                    state.next(LifecycleEvent::Command(command), restart_on_failure)
                }
                RoundEnd::Failed(err) => {
                    error!(error = %err, "server stopped with an error");
                    if !restart_on_failure {
                        fatal = Some(err);
                    }
                    state.next(LifecycleEvent::ServerFailed, restart_on_failure)
                }
            },
            ServerState::ShuttingDown(_) => {
                state.next(LifecycleEvent::ShutdownComplete, restart_on_failure)
            }
            ServerState::Restarting => {
                info!("Restarting server...");
                tokio::time::sleep(restart_delay).await;
                state.next(LifecycleEvent::RestartDelayElapsed, restart_on_failure)
            }
            ServerState::Stopped => break,
        };
        debug!(?state, "lifecycle transition");
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
