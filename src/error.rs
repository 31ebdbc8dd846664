use std::io;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::codec::LinesCodecError;

#[derive(Error, Debug)]
pub enum PcapdError {
    /// 配置错误，在激活之前出现
    #[error("Configuration error: {0}")]
    Config(String),

    /// 无法打开或配置抓包设备
    #[error("Activation error: {0}")]
    Activation(String),

    /// 运行中设备读取失败，不重试
    #[error("Read error: {0}")]
    Read(String),

    /// 主机接口查询失败，对外只表现为 success = false
    #[error("Interface enumeration error: {0}")]
    Enumeration(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid session state: {0}")]
    State(String),

    #[error("IO error {0}")]
    Io(io::ErrorKind),

    #[error("JoinError: {0}")]
    JoinError(JoinError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<pcap::Error> for PcapdError {
    fn from(err: pcap::Error) -> Self {
        match err {
            pcap::Error::IoError(e) => Self::Io(e),
            _ => Self::Read(err.to_string()),
        }
    }
}

impl From<io::Error> for PcapdError {
    fn from(err: io::Error) -> Self {
        PcapdError::Io(err.kind())
    }
}

impl From<JoinError> for PcapdError {
    fn from(err: JoinError) -> Self {
        PcapdError::JoinError(err)
    }
}

impl From<serde_yaml::Error> for PcapdError {
    fn from(err: serde_yaml::Error) -> Self {
        PcapdError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PcapdError {
    fn from(err: serde_json::Error) -> Self {
        PcapdError::Protocol(err.to_string())
    }
}

impl From<LinesCodecError> for PcapdError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => Self::Io(e.kind()),
            LinesCodecError::MaxLineLengthExceeded => Self::Protocol("request line too long".to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PcapdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PcapdError::Config("snapshot length must be positive".to_string());
        assert_eq!(err.to_string(), "Configuration error: snapshot length must be positive");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: PcapdError = io_err.into();
        assert!(matches!(err, PcapdError::Io(io::ErrorKind::NotFound)));
    }

    #[test]
    fn test_pcap_error_is_read_error() {
        let err: PcapdError = pcap::Error::PcapError("device went away".to_string()).into();
        match err {
            PcapdError::Read(msg) => assert!(msg.contains("device went away")),
            other => panic!("Expected Read error variant, got {:?}", other),
        }
    }

    #[test]
    fn test_json_error_is_protocol_error() {
        let err: PcapdError = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert!(matches!(err, PcapdError::Protocol(_)));
    }
}
