use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use super::arbiter::{Arbitration, CancellationArbiter, SessionEnd};
use super::packet::{frame, PacketRecord};
use super::source::{ActivationSettings, SourceOpener};
use super::CaptureConfig;
use crate::error::{PcapdError, Result};
use crate::monitor::ServiceMetrics;

pub const DEFAULT_BUFFER_SIZE: u32 = 4 * 1024 * 1024;

const NANOS_PER_MILLI: u128 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configuring,
    Activating,
    Running,
    Draining,
    Closed,
    Failed,
}

/// 数据包的去向
#[async_trait]
pub trait PacketSink: Send {
    async fn emit(&mut self, record: PacketRecord) -> Result<()>;
}

/// 抓包会话，独占一个抓包句柄
pub struct CaptureSession {
    config: CaptureConfig,
    state: SessionState,
    opener: Arc<dyn SourceOpener>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
    metrics: Arc<ServiceMetrics>,
}

impl CaptureSession {
    pub fn new(
        config: CaptureConfig,
        opener: Arc<dyn SourceOpener>,
        shutdown: CancellationToken,
        cancel: CancellationToken,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            state: SessionState::Uninitialized,
            opener,
            shutdown,
            cancel,
            metrics,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("{}: {:?} -> {:?}", self.config.interface, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: PcapdError) -> PcapdError {
        error!("{}: capture failed: {}", self.config.interface, err);
        self.transition(SessionState::Failed);
        self.metrics.session_failed();
        err
    }

    /// 运行整个会话：配置、激活、读取循环、释放。每个会话只能运行一次。
    ///
    /// 关闭和客户端断开返回 Ok；配置、激活和读取失败返回 Err。
    pub async fn run(&mut self, sink: &mut dyn PacketSink) -> Result<SessionEnd> {
        if self.state != SessionState::Uninitialized {
            return Err(PcapdError::State(format!(
                "{}: session already {:?}",
                self.config.interface, self.state
            )));
        }

        self.transition(SessionState::Configuring);
        let settings = match validate(&self.config) {
            Ok(settings) => settings,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(SessionState::Activating);
        let source = match self.opener.open(&settings) {
            Ok(source) => source,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(SessionState::Running);
        self.metrics.session_started();
        let mut arbiter = CancellationArbiter::new(source, self.shutdown.clone(), self.cancel.clone());
        let result = self.pump(&mut arbiter, sink, settings.snaplen as usize).await;

        self.transition(SessionState::Draining);
        drop(arbiter);
        self.metrics.session_finished();

        match result {
            Ok(end) => {
                match end {
                    SessionEnd::Shutdown => info!("Stopped capture on {} via interrupt", self.config.interface),
                    SessionEnd::ClientGone => info!("Stopped capture on {}: client went away", self.config.interface),
                    SessionEnd::EndOfStream => info!("Capture on {} reached end of stream", self.config.interface),
                }
                self.transition(SessionState::Closed);
                Ok(end)
            }
            Err(e) => {
                error!("{}: capture stopped: {}", self.config.interface, e);
                self.metrics.session_failed();
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }

    async fn pump(
        &self,
        arbiter: &mut CancellationArbiter,
        sink: &mut dyn PacketSink,
        snaplen: usize,
    ) -> Result<SessionEnd> {
        loop {
            let mut packet = match arbiter.next().await? {
                Arbitration::Packet(packet) => packet,
                Arbitration::Idle => continue,
                Arbitration::Stopped(end) => return Ok(end),
            };

            packet.data.truncate(snaplen);
            let record = frame(packet.timestamp, packet.original_length, packet.data);
            let bytes = record.data.len() as u64;

            match arbiter.race(sink.emit(record)).await {
                Ok(Ok(())) => self.metrics.packet_emitted(bytes),
                Ok(Err(e)) => {
                    debug!("{}: emit failed: {}", self.config.interface, e);
                    return Ok(SessionEnd::ClientGone);
                }
                Err(end) => return Ok(end),
            }
        }
    }
}

/// 校验配置并生成激活参数。过滤器在这里不编译。
pub fn validate(config: &CaptureConfig) -> Result<ActivationSettings> {
    if config.interface.is_empty() {
        return Err(PcapdError::Config("interface is required".to_string()));
    }

    if config.snaplen == 0 {
        return Err(PcapdError::Config("snapshot length must be positive".to_string()));
    }
    let snaplen = i32::try_from(config.snaplen)
        .map_err(|_| PcapdError::Config(format!("snapshot length {} too large", config.snaplen)))?;

    let buffer_size = if config.buffer_size == 0 {
        DEFAULT_BUFFER_SIZE
    } else {
        config.buffer_size
    };
    let buffer_size = i32::try_from(buffer_size)
        .map_err(|_| PcapdError::Config(format!("buffer size {} too large", buffer_size)))?;

    // 向上取整，避免亚毫秒超时变成永久阻塞
    let timeout_ms = (config.read_timeout.as_nanos() + NANOS_PER_MILLI - 1) / NANOS_PER_MILLI;
    let timeout_ms = i32::try_from(timeout_ms)
        .map_err(|_| PcapdError::Config(format!("read timeout {:?} too large", config.read_timeout)))?;

    Ok(ActivationSettings {
        interface: config.interface.clone(),
        filter: config.filter.clone().filter(|f| !f.is_empty()),
        snaplen,
        buffer_size,
        immediate_mode: config.immediate_mode,
        promiscuous: config.promiscuous,
        monitor_mode: config.monitor_mode,
        timeout_ms,
    })
}
