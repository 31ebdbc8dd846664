//! 本地 Unix socket 服务
//!
//! 每个连接处理一个请求。抓包请求期间，连接的读端被单独监视，
//! 客户端关闭连接即取消该会话。

use std::fs;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::capture::{CaptureSession, InterfaceCatalog, PacketRecord, PacketSink, SourceOpener};
use crate::cli::ServerConfig;
use crate::error::{PcapdError, Result};
use crate::monitor::ServiceMetrics;
use crate::protocol::{CaptureReply, CaptureRequest, Request, MAX_REQUEST_LINE};

/// 关闭时等待连接结束的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 客户端关闭写端后，检查连接是否完全断开的间隔
const HANGUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 所有连接共享的只读上下文
pub struct ServerContext {
    pub catalog: InterfaceCatalog,
    pub opener: Arc<dyn SourceOpener>,
    pub shutdown: CancellationToken,
    pub metrics: Arc<ServiceMetrics>,
    pub default_snaplen: u32,
}

pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// 绑定 socket。旧的 socket 文件会被删除。
    pub fn bind(config: &ServerConfig, ctx: ServerContext) -> Result<Self> {
        let socket_path = PathBuf::from(&config.socket_path);
        remove_stale_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path)?;
        fs::set_permissions(&socket_path, fs::Permissions::from_mode(config.socket_mode))?;
        info!("Listening on {} (mode {:o})", socket_path.display(), config.socket_mode);

        Ok(Self {
            listener,
            socket_path,
            ctx: Arc::new(ctx),
        })
    }

    /// 接受连接直到全局关闭信号触发，然后等待所有连接结束
    pub async fn serve(self) -> Result<()> {
        let tracker = TaskTracker::new();
        let shutdown = self.ctx.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                warn!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }

        info!("Stopping gracefully; waiting for {} connection(s)", tracker.len());
        tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
            warn!("Connections still open after {:?}", DRAIN_TIMEOUT);
        }

        drop(self.listener);
        if let Err(e) = fs::remove_file(&self.socket_path) {
            warn!("Failed to remove {}: {}", self.socket_path.display(), e);
        }
        info!("Server stopped: {}", self.ctx.metrics.snapshot());
        Ok(())
    }
}

/// 只删除 socket 文件，其他类型的文件保留并报配置错误
fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !metadata.file_type().is_socket() {
        return Err(PcapdError::Config(format!(
            "{} exists and is not a socket",
            path.display()
        )));
    }

    fs::remove_file(path)?;
    info!("Removed stale socket {}", path.display());
    Ok(())
}

/// 对端两个方向都已关闭。只关闭写端(half-close)不算。
fn peer_hung_up(fd: RawFd) -> bool {
    let mut pollfd = libc::pollfd {
        fd,
        events: 0,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pollfd, 1, 0) };
    ready > 0 && pollfd.revents & (libc::POLLHUP | libc::POLLERR) != 0
}

/// 监视连接的读端，客户端断开时取消会话
async fn watch_client(mut lines: FramedRead<OwnedReadHalf, LinesCodec>, cancel: CancellationToken) {
    loop {
        match lines.next().await {
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("client read failed: {}", e);
                cancel.cancel();
                return;
            }
            None => break,
        }
    }

    // 客户端可能只关闭了写端，仍在接收
    let fd = lines.get_ref().as_ref().as_raw_fd();
    let mut ticker = tokio::time::interval(HANGUP_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if peer_hung_up(fd) {
            cancel.cancel();
            return;
        }
    }
}

async fn handle_connection(stream: UnixStream, ctx: Arc<ServerContext>) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));
    let mut writer = FramedWrite::new(write_half, LinesCodec::new());

    let line = match lines.next().await {
        Some(line) => line?,
        None => return Ok(()),
    };
    let request: Request = match serde_json::from_str(&line) {
        Ok(request) => request,
        Err(e) => {
            let err = PcapdError::from(e);
            writer.send(serde_json::to_string(&CaptureReply::Error(err.to_string()))?).await?;
            return Err(err);
        }
    };

    match request {
        Request::ListInterfaces { all } => {
            info!("ListInterfaces(all={})", all);
            let reply = ctx.catalog.list(all);
            writer.send(serde_json::to_string(&reply)?).await?;
            Ok(())
        }
        Request::StreamCapture(capture) => {
            info!("StreamCapture({:?})", capture);
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(watch_client(lines, cancel.clone()));

            let result = stream_capture(capture, &mut writer, cancel, &ctx).await;
            watcher.abort();
            result
        }
    }
}

async fn stream_capture(
    request: CaptureRequest,
    writer: &mut FramedWrite<OwnedWriteHalf, LinesCodec>,
    cancel: CancellationToken,
    ctx: &ServerContext,
) -> Result<()> {
    let config = request.into_config(ctx.default_snaplen);
    let mut session = CaptureSession::new(
        config,
        Arc::clone(&ctx.opener),
        ctx.shutdown.clone(),
        cancel,
        Arc::clone(&ctx.metrics),
    );

    let mut sink = LineSink { writer };
    if let Err(e) = session.run(&mut sink).await {
        sink.writer
            .send(serde_json::to_string(&CaptureReply::Error(e.to_string()))?)
            .await?;
    }
    Ok(())
}

/// 把记录写成 JSON 行
struct LineSink<'a> {
    writer: &'a mut FramedWrite<OwnedWriteHalf, LinesCodec>,
}

#[async_trait::async_trait]
impl<'a> PacketSink for LineSink<'a> {
    async fn emit(&mut self, record: PacketRecord) -> Result<()> {
        let line = serde_json::to_string(&CaptureReply::Data(record))?;
        self.writer.send(line).await.map_err(PcapdError::from)
    }
}
