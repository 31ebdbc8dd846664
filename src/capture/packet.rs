use bytes::Bytes;
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_MICRO: u32 = 1_000;

/// 设备给出的原始时间戳，精度可能高于微秒
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTimestamp {
    secs: i64,
    nanos: u32,
}

impl RawTimestamp {
    /// 超过一秒的纳秒部分进位到秒
    pub fn new(secs: i64, nanos: u64) -> Self {
        Self {
            secs: secs + (nanos / NANOS_PER_SEC) as i64,
            nanos: (nanos % NANOS_PER_SEC) as u32,
        }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn subsec_nanos(&self) -> u32 {
        self.nanos
    }
}

impl From<libc::timeval> for RawTimestamp {
    fn from(tv: libc::timeval) -> Self {
        let micros = (tv.tv_usec as i64).max(0) as u64;
        Self::new(tv.tv_sec as i64, micros * NANOS_PER_MICRO as u64)
    }
}

/// 一次成功读取的结果，跨线程交给仲裁器
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub timestamp: RawTimestamp,
    pub original_length: u32,
    pub data: Vec<u8>,
}

/// 发给客户端的数据包记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub seconds: i64,
    pub microseconds: u32,
    pub original_length: u32,
    pub data: Bytes,
}

/// 将一次读取结果转换为记录。亚秒部分截断到微秒，不做四舍五入。
pub fn frame(timestamp: RawTimestamp, original_length: u32, payload: Vec<u8>) -> PacketRecord {
    PacketRecord {
        seconds: timestamp.secs(),
        microseconds: timestamp.subsec_nanos() / NANOS_PER_MICRO,
        original_length,
        data: Bytes::from(payload),
    }
}
