use log::{debug, info, warn};
use pcap::{Activated, Active, Capture};

use super::packet::{RawPacket, RawTimestamp};
use crate::error::{PcapdError, Result};

/// 单次读取的结果
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(RawPacket),
    /// 读超时内没有数据包，不是终止条件
    TimedOut,
    EndOfStream,
}

/// 活动抓包句柄。由一个会话独占，drop 即释放。
pub trait PacketSource: Send + 'static {
    fn read_packet(&mut self) -> Result<ReadOutcome>;
}

/// 校验之后、激活时使用的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationSettings {
    pub interface: String,
    pub filter: Option<String>,
    pub snaplen: i32,
    pub buffer_size: i32,
    pub immediate_mode: bool,
    pub promiscuous: bool,
    pub monitor_mode: bool,
    /// 0 表示阻塞直到有包
    pub timeout_ms: i32,
}

/// libpcap 单次读取最多等待的毫秒数。读超时只是非事件，
/// 取消后进行中的读取最迟在这个间隔内返回并释放句柄。
pub const MAX_POLL_INTERVAL_MS: i32 = 100;

/// 请求的读超时换算成交给 libpcap 的超时，0(阻塞)也变成有限间隔
pub fn poll_timeout_ms(requested_ms: i32) -> i32 {
    if requested_ms <= 0 {
        MAX_POLL_INTERVAL_MS
    } else {
        requested_ms.min(MAX_POLL_INTERVAL_MS)
    }
}

/// 打开抓包句柄，包括激活后的过滤器编译
pub trait SourceOpener: Send + Sync {
    fn open(&self, settings: &ActivationSettings) -> Result<Box<dyn PacketSource>>;
}

pub struct PcapOpener;

impl SourceOpener for PcapOpener {
    fn open(&self, settings: &ActivationSettings) -> Result<Box<dyn PacketSource>> {
        let mut cap = activate_with_fallback(settings.monitor_mode, &settings.interface, |rfmon| {
            inactive_capture(settings, rfmon)
        })?;

        if let Some(filter) = &settings.filter {
            apply_filter(&mut cap, &settings.interface, filter)?;
        }

        info!("{}: capture handle active", settings.interface);
        Ok(Box::new(PcapSource {
            cap,
            interface: settings.interface.clone(),
        }))
    }
}

/// 编译并安装 BPF 过滤器。编译失败属于配置错误。
pub fn apply_filter<T: Activated + ?Sized>(cap: &mut Capture<T>, interface: &str, expr: &str) -> Result<()> {
    info!("{}: applying BPF filter {:?}", interface, expr);
    cap.filter(expr, true)
        .map_err(|e| PcapdError::Config(format!("invalid filter {:?}: {}", expr, e)))
}

// 设置顺序: snaplen, buffer, immediate, promisc, rfmon, timeout
fn inactive_capture(settings: &ActivationSettings, rfmon: bool) -> std::result::Result<Capture<Active>, pcap::Error> {
    Capture::from_device(settings.interface.as_str())?
        .snaplen(settings.snaplen)
        .buffer_size(settings.buffer_size)
        .immediate_mode(settings.immediate_mode)
        .promisc(settings.promiscuous)
        .rfmon(rfmon)
        .timeout(poll_timeout_ms(settings.timeout_ms))
        .open()
}

/// 激活抓包。请求了监听模式但激活失败时，记录警告后不带监听模式重试一次。
pub fn activate_with_fallback<T, F>(monitor_mode: bool, interface: &str, mut activate: F) -> Result<T>
where
    F: FnMut(bool) -> std::result::Result<T, pcap::Error>,
{
    let activation_error = |e: pcap::Error| PcapdError::Activation(format!("{}: {}", interface, e));

    match activate(monitor_mode) {
        Ok(handle) => Ok(handle),
        Err(e) if monitor_mode => {
            warn!("{}: monitor mode unavailable ({}), continuing without it", interface, e);
            activate(false).map_err(activation_error)
        }
        Err(e) => Err(activation_error(e)),
    }
}

pub struct PcapSource {
    cap: Capture<Active>,
    interface: String,
}

impl PacketSource for PcapSource {
    fn read_packet(&mut self) -> Result<ReadOutcome> {
        match self.cap.next_packet() {
            Ok(packet) => Ok(ReadOutcome::Packet(RawPacket {
                timestamp: RawTimestamp::from(packet.header.ts),
                original_length: packet.header.len,
                data: packet.data.to_vec(),
            })),
            Err(pcap::Error::TimeoutExpired) => Ok(ReadOutcome::TimedOut),
            Err(pcap::Error::NoMorePackets) => Ok(ReadOutcome::EndOfStream),
            Err(e) => Err(PcapdError::Read(format!("{}: {}", self.interface, e))),
        }
    }
}

impl Drop for PcapSource {
    fn drop(&mut self) {
        debug!("{}: capture handle released", self.interface);
    }
}
