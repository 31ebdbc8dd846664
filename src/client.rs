//! 命令行客户端，连接本地 socket 调用两个操作

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::capture::{InterfaceInfo, PacketRecord};
use crate::error::{PcapdError, Result};
use crate::protocol::{CaptureReply, CaptureRequest, ListInterfacesReply, Request};

async fn connect(socket: &str, request: &Request) -> Result<Framed<UnixStream, LinesCodec>> {
    let stream = UnixStream::connect(socket).await?;
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed.send(serde_json::to_string(request)?).await?;
    Ok(framed)
}

pub async fn list_interfaces(socket: &str, all: bool) -> Result<ListInterfacesReply> {
    let mut framed = connect(socket, &Request::ListInterfaces { all }).await?;
    match framed.next().await {
        Some(line) => Ok(serde_json::from_str(&line?)?),
        None => Err(PcapdError::Protocol("connection closed before reply".to_string())),
    }
}

/// 接收抓包流，直到流结束或收到 `count` 个包。返回服务端报告的错误。
///
/// 连接在整个过程中保持双向打开；提前返回时关闭连接，服务端据此取消会话。
pub async fn stream_capture<F>(
    socket: &str,
    request: &CaptureRequest,
    count: Option<usize>,
    mut on_record: F,
) -> Result<Option<String>>
where
    F: FnMut(PacketRecord),
{
    let mut framed = connect(socket, &Request::StreamCapture(request.clone())).await?;
    let mut received = 0;

    while let Some(line) = framed.next().await {
        let reply: CaptureReply = match serde_json::from_str(&line?) {
            Ok(reply) => reply,
            // 服务端停止时最后一行可能只写了一半
            Err(e) => match framed.next().await {
                None => break,
                Some(_) => return Err(e.into()),
            },
        };
        match reply {
            CaptureReply::Data(record) => {
                on_record(record);
                received += 1;
                if count.is_some_and(|limit| received >= limit) {
                    break;
                }
            }
            CaptureReply::Error(message) => return Ok(Some(message)),
        }
    }
    Ok(None)
}

pub fn format_interface(iface: &InterfaceInfo) -> String {
    let mut out = format!(
        "{}: {}\n    ether {}",
        iface.name,
        if iface.up { "UP" } else { "DOWN" },
        iface.ethernet_addresses.join(", ")
    );
    for addr in &iface.ipv4_addresses {
        out.push_str(&format!("\n    inet {}", addr));
    }
    for addr in &iface.ipv6_addresses {
        out.push_str(&format!("\n    inet6 {}", addr));
    }
    out
}

pub fn format_record(record: &PacketRecord) -> String {
    format!(
        "{}.{:06} len={} caplen={}",
        record.seconds,
        record.microseconds,
        record.original_length,
        record.data.len()
    )
}
