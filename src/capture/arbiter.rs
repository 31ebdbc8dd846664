//! 单个会话内的读取仲裁
//!
//! 每次迭代只发起一个阻塞读取，在独立线程上执行。读取结果通过 JoinHandle
//! 交回，与全局关闭信号、会话取消信号竞争，先到者生效。

use std::future::Future;

use log::debug;
use tokio_util::sync::CancellationToken;

use super::packet::RawPacket;
use super::source::{PacketSource, ReadOutcome};
use crate::error::{PcapdError, Result};

/// 会话正常结束的原因，不是错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
    ClientGone,
    EndOfStream,
}

/// 一次仲裁的结果
#[derive(Debug)]
pub enum Arbitration {
    Packet(RawPacket),
    /// 读超时，没有事件
    Idle,
    Stopped(SessionEnd),
}

pub struct CancellationArbiter {
    // 读取进行中时为 None，句柄在阻塞线程里
    source: Option<Box<dyn PacketSource>>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
}

impl CancellationArbiter {
    pub fn new(source: Box<dyn PacketSource>, shutdown: CancellationToken, cancel: CancellationToken) -> Self {
        Self {
            source: Some(source),
            shutdown,
            cancel,
        }
    }

    fn signalled(&self) -> Option<SessionEnd> {
        if self.shutdown.is_cancelled() {
            Some(SessionEnd::Shutdown)
        } else if self.cancel.is_cancelled() {
            Some(SessionEnd::ClientGone)
        } else {
            None
        }
    }

    /// 发起一次读取并等待第一个事件。
    ///
    /// 信号先到时立即返回，不等待进行中的读取；句柄随读取线程结束而释放。
    pub async fn next(&mut self) -> Result<Arbitration> {
        if let Some(end) = self.signalled() {
            return Ok(Arbitration::Stopped(end));
        }

        let mut source = self
            .source
            .take()
            .ok_or_else(|| PcapdError::State("capture handle no longer available".to_string()))?;

        let mut read = tokio::task::spawn_blocking(move || {
            let outcome = source.read_packet();
            (source, outcome)
        });

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!("shutdown observed with a read in flight");
                Ok(Arbitration::Stopped(SessionEnd::Shutdown))
            }
            _ = self.cancel.cancelled() => {
                debug!("cancellation observed with a read in flight");
                Ok(Arbitration::Stopped(SessionEnd::ClientGone))
            }
            joined = &mut read => {
                let (source, outcome) = joined?;
                self.source = Some(source);
                match outcome? {
                    ReadOutcome::Packet(packet) => Ok(Arbitration::Packet(packet)),
                    ReadOutcome::TimedOut => Ok(Arbitration::Idle),
                    ReadOutcome::EndOfStream => Ok(Arbitration::Stopped(SessionEnd::EndOfStream)),
                }
            }
        }
    }

    /// 让任意 future 同样受两个信号约束，例如向客户端发送
    pub async fn race<F: Future>(&mut self, fut: F) -> std::result::Result<F::Output, SessionEnd> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SessionEnd::Shutdown),
            _ = self.cancel.cancelled() => Err(SessionEnd::ClientGone),
            output = fut => Ok(output),
        }
    }
}
