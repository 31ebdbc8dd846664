//! 测试用的假抓包句柄，不需要抓包权限

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::packet::{PacketRecord, RawPacket, RawTimestamp};
use super::session::PacketSink;
use super::source::{ActivationSettings, PacketSource, ReadOutcome, SourceOpener};
use crate::error::{PcapdError, Result};

pub(crate) const INVALID_FILTER: &str = "tcp port port";

/// 空闲接口上一次读取等待的时间
const QUIET_POLL: Duration = Duration::from_millis(20);

#[async_trait]
impl PacketSink for mpsc::Sender<PacketRecord> {
    async fn emit(&mut self, record: PacketRecord) -> Result<()> {
        self.send(record)
            .await
            .map_err(|_| PcapdError::Io(std::io::ErrorKind::BrokenPipe))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Packet(RawPacket),
    TimedOut,
    Error(&'static str),
    /// 阻塞直到 unstall()
    Stall,
    /// 没有流量的接口：每次读取等待一个轮询间隔后超时，一直重复
    Quiet,
}

impl Step {
    pub(crate) fn packet(secs: i64, len: u32) -> Self {
        Step::Packet(RawPacket {
            timestamp: RawTimestamp::new(secs, 123_456_789),
            original_length: len,
            data: vec![0x5a; len as usize],
        })
    }
}

#[derive(Default)]
struct CountersInner {
    opens: AtomicUsize,
    reads: AtomicUsize,
    releases: AtomicUsize,
    stalled: AtomicUsize,
    unstalled: Mutex<bool>,
    wake: Condvar,
}

/// 观察假句柄的打开、读取和释放次数
#[derive(Clone, Default)]
pub(crate) struct Counters {
    inner: Arc<CountersInner>,
}

impl Counters {
    pub(crate) fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }

    pub(crate) fn unstall(&self) {
        let mut unstalled = self.inner.unstalled.lock().unwrap();
        *unstalled = true;
        self.inner.wake.notify_all();
    }

    pub(crate) async fn wait_reads(&self, count: usize, limit: Duration) -> bool {
        wait_until(limit, || self.reads() >= count).await
    }

    pub(crate) async fn wait_stalled(&self, limit: Duration) -> bool {
        wait_until(limit, || self.inner.stalled.load(Ordering::SeqCst) > 0).await
    }

    pub(crate) async fn wait_released(&self, limit: Duration) -> bool {
        wait_until(limit, || self.releases() > 0).await
    }
}

async fn wait_until(limit: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

pub(crate) struct FakeSource {
    steps: VecDeque<Step>,
    counters: Counters,
}

impl FakeSource {
    pub(crate) fn new(steps: Vec<Step>) -> (Self, Counters) {
        let counters = Counters::default();
        (Self::with_counters(steps, counters.clone()), counters)
    }

    fn with_counters(steps: Vec<Step>, counters: Counters) -> Self {
        Self {
            steps: steps.into(),
            counters,
        }
    }
}

impl PacketSource for FakeSource {
    fn read_packet(&mut self) -> Result<ReadOutcome> {
        self.counters.inner.reads.fetch_add(1, Ordering::SeqCst);
        if matches!(self.steps.front(), Some(Step::Quiet)) {
            std::thread::sleep(QUIET_POLL);
            return Ok(ReadOutcome::TimedOut);
        }
        match self.steps.pop_front() {
            Some(Step::Packet(packet)) => Ok(ReadOutcome::Packet(packet)),
            Some(Step::TimedOut) => Ok(ReadOutcome::TimedOut),
            Some(Step::Error(msg)) => Err(PcapdError::Read(msg.to_string())),
            Some(Step::Stall) => {
                self.counters.inner.stalled.fetch_add(1, Ordering::SeqCst);
                let mut unstalled = self.counters.inner.unstalled.lock().unwrap();
                while !*unstalled {
                    unstalled = self.counters.inner.wake.wait(unstalled).unwrap();
                }
                Ok(ReadOutcome::TimedOut)
            }
            Some(Step::Quiet) | None => Ok(ReadOutcome::EndOfStream),
        }
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.counters.inner.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// 每次 open 都产生一个按 steps 回放的 FakeSource
#[derive(Clone)]
pub(crate) struct FakeOpener {
    steps: Vec<Step>,
    fail: bool,
    counters: Counters,
}

impl FakeOpener {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            fail: false,
            counters: Counters::default(),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn counters(&self) -> Counters {
        self.counters.clone()
    }
}

impl SourceOpener for FakeOpener {
    fn open(&self, settings: &ActivationSettings) -> Result<Box<dyn PacketSource>> {
        if self.fail {
            return Err(PcapdError::Activation(format!("{}: No such device exists", settings.interface)));
        }

        self.counters.inner.opens.fetch_add(1, Ordering::SeqCst);
        let source = FakeSource::with_counters(self.steps.clone(), self.counters.clone());
        if settings.filter.as_deref() == Some(INVALID_FILTER) {
            drop(source);
            return Err(PcapdError::Config(format!("invalid filter {:?}: syntax error", INVALID_FILTER)));
        }
        Ok(Box::new(source))
    }
}
