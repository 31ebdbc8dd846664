mod capture;
mod cli;
mod client;
mod error;
mod monitor;
mod protocol;
mod server;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Args, Command, ServerConfig, DEFAULT_SOCKET_PATH};
use error::Result;
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use capture::{InterfaceCatalog, PcapOpener};
use monitor::ServiceMetrics;
use protocol::CaptureRequest;
use server::{Server, ServerContext};

/// 阻塞中的读取线程不会阻止进程退出超过这个时间
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // serve 的配置文件可以指定日志级别，需要在初始化日志之前加载
    let server_config = match &args.command {
        Command::Serve { config } => Some(ServerConfig::load(config.as_deref(), args.socket.as_deref())?),
        _ => None,
    };
    let log_level = args
        .log_level
        .clone()
        .or_else(|| server_config.as_ref().and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());

    // 初始化日志
    env_logger::Builder::new()
        .filter_level(log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(run(args, server_config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(args: Args, server_config: Option<ServerConfig>) -> Result<()> {
    let socket = args.socket.clone().unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string());

    match args.command {
        Command::Serve { .. } => serve(server_config.unwrap_or_default()).await,
        Command::Interfaces { all } => {
            let reply = client::list_interfaces(&socket, all).await?;
            if !reply.success {
                warn!("Server could not enumerate interfaces");
            }
            for iface in &reply.interfaces {
                println!("{}", client::format_interface(iface));
            }
            Ok(())
        }
        Command::Capture(capture) => {
            let request = CaptureRequest::from(&capture);
            let error = client::stream_capture(&socket, &request, capture.count, |record| {
                println!("{}", client::format_record(&record));
            })
            .await?;
            match error {
                Some(message) => Err(anyhow::anyhow!(message).into()),
                None => Ok(()),
            }
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    // 全局关闭信号，所有会话共享
    let shutdown = CancellationToken::new();
    let metrics = Arc::new(ServiceMetrics::new());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received; stopping gracefully...");
            }
            shutdown.cancel();
        }
    });

    let mut quit = signal(SignalKind::quit())?;
    tokio::spawn({
        let metrics = Arc::clone(&metrics);
        async move {
            while quit.recv().await.is_some() {
                info!("=== received SIGQUIT === {}", metrics.snapshot());
            }
        }
    });

    let ctx = ServerContext {
        catalog: InterfaceCatalog::default(),
        opener: Arc::new(PcapOpener),
        shutdown,
        metrics,
        default_snaplen: config.default_snaplen,
    };
    Server::bind(&config, ctx)?.serve().await
}
