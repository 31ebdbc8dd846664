//! 本地传输上的请求/响应格式
//!
//! 每个消息是一行 JSON。请求按 `method` 区分；抓包流的每一行是
//! `{"data": ...}`，出错时最后一行是 `{"error": "..."}`。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capture::{CaptureConfig, InterfaceList, PacketRecord};

/// 请求行的最大长度
pub const MAX_REQUEST_LINE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    ListInterfaces {
        #[serde(default)]
        all: bool,
    },
    StreamCapture(CaptureRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRequest {
    pub interface: String,
    pub filter: String,
    pub snaplen: u32,
    pub buffer_size_bytes: u32,
    pub promiscuous_mode: bool,
    pub rf_monitor: bool,
    pub immediate_mode: bool,
    pub timeout_ns: u64,
}

impl CaptureRequest {
    /// snaplen 为 0 时使用服务端的默认值
    pub fn into_config(self, default_snaplen: u32) -> CaptureConfig {
        CaptureConfig {
            interface: self.interface,
            filter: Some(self.filter).filter(|f| !f.is_empty()),
            snaplen: if self.snaplen == 0 { default_snaplen } else { self.snaplen },
            buffer_size: self.buffer_size_bytes,
            promiscuous: self.promiscuous_mode,
            monitor_mode: self.rf_monitor,
            immediate_mode: self.immediate_mode,
            read_timeout: Duration::from_nanos(self.timeout_ns),
        }
    }
}

pub type ListInterfacesReply = InterfaceList;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureReply {
    Data(PacketRecord),
    Error(String),
}
