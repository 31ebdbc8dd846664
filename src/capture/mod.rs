//! 数据包捕获模块
//!
//! 该模块提供了接口枚举、抓包会话以及读取仲裁的功能。

pub mod arbiter;
pub mod interface;
pub mod packet;
pub mod session;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use interface::{InterfaceCatalog, InterfaceInfo, InterfaceList};
pub use packet::PacketRecord;
pub use session::{CaptureSession, PacketSink};
pub use source::{PcapOpener, SourceOpener};

use std::time::Duration;

/// 捕获配置，交给会话后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// 接口名称
    pub interface: String,
    /// BPF 过滤表达式
    pub filter: Option<String>,
    /// 每个包最多捕获的字节数
    pub snaplen: u32,
    /// 内核缓冲区大小(字节)，0 表示默认 4 MiB
    pub buffer_size: u32,
    /// 是否开启混杂模式
    pub promiscuous: bool,
    /// 是否请求监听模式，失败不致命
    pub monitor_mode: bool,
    pub immediate_mode: bool,
    /// 读超时，0 表示阻塞直到有包
    pub read_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            filter: None,
            snaplen: 262144,
            buffer_size: 0,
            promiscuous: false,
            monitor_mode: false,
            immediate_mode: false,
            read_timeout: Duration::ZERO,
        }
    }
}
