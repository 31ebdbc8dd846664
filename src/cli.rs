use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;

use crate::error::Result;
use crate::protocol::CaptureRequest;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/pcapd.sock";

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Unix socket 路径
    #[arg(short, long, global = true)]
    pub socket: Option<String>,

    /// 日志级别，优先于配置文件
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 启动服务
    Serve {
        /// 配置文件路径
        #[arg(short, long)]
        config: Option<String>,
    },
    /// 列出网络接口
    Interfaces {
        /// 包括未启用的接口
        #[arg(short, long)]
        all: bool,
    },
    /// 实时抓包
    Capture(CaptureArgs),
}

#[derive(clap::Args, Debug)]
pub struct CaptureArgs {
    /// 要抓包的网络接口名称
    #[arg(short, long)]
    pub interface: String,

    /// BPF 过滤表达式
    #[arg(short, long, default_value = "")]
    pub filter: String,

    /// 每个包最多捕获的字节数，0 表示使用服务端默认值
    #[arg(long, default_value_t = 0)]
    pub snaplen: u32,

    /// 内核缓冲区大小(字节)，0 表示 4 MiB
    #[arg(long, default_value_t = 0)]
    pub buffer_size: u32,

    #[arg(long)]
    pub promisc: bool,

    #[arg(long)]
    pub rfmon: bool,

    #[arg(long)]
    pub immediate: bool,

    /// 读超时(纳秒)，0 表示阻塞
    #[arg(long, default_value_t = 0)]
    pub timeout_ns: u64,

    /// 收到这么多包后退出
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

impl From<&CaptureArgs> for CaptureRequest {
    fn from(args: &CaptureArgs) -> Self {
        CaptureRequest {
            interface: args.interface.clone(),
            filter: args.filter.clone(),
            snaplen: args.snaplen,
            buffer_size_bytes: args.buffer_size,
            promiscuous_mode: args.promisc,
            rf_monitor: args.rfmon,
            immediate_mode: args.immediate,
            timeout_ns: args.timeout_ns,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: String,
    /// socket 文件权限，默认 0770：属主和属组可用
    pub socket_mode: u32,
    /// 请求中 snaplen 为 0 时使用
    pub default_snaplen: u32,
    pub log_level: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            socket_mode: 0o770,
            default_snaplen: 262144,
            log_level: None,
        }
    }
}

impl ServerConfig {
    /// 从 YAML 文件加载配置
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(contents)?;
        if config.default_snaplen == 0 {
            return Err(crate::error::PcapdError::Config("default_snaplen must be positive".to_string()));
        }
        Ok(config)
    }

    /// 命令行参数优先于配置文件
    pub fn load(path: Option<&str>, socket: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(socket) = socket {
            config.socket_path = socket.to_string();
        }
        Ok(config)
    }
}
