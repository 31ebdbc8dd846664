use std::net::IpAddr;

use log::{debug, warn};
use pnet::datalink;
use serde::{Deserialize, Serialize};

use crate::error::{PcapdError, Result};

#[cfg(test)]
use mockall::automock;

/// 主机报告的接口原始信息
#[derive(Debug, Clone, Default)]
pub struct HostInterface {
    pub name: String,
    pub flags: u32,
    /// 空字符串表示没有硬件地址
    pub hardware_addr: String,
    /// 可能带有 "/N" 前缀长度后缀
    pub addresses: Vec<String>,
}

impl HostInterface {
    pub fn is_up(&self) -> bool {
        self.flags & libc::IFF_UP as u32 != 0
    }
}

/// 查询主机的接口集合
#[cfg_attr(test, automock)]
pub trait InterfaceQuery: Send + Sync {
    fn interfaces(&self) -> Result<Vec<HostInterface>>;
}

/// 通过 pnet 的 datalink 获取接口
pub struct PnetInterfaces;

impl InterfaceQuery for PnetInterfaces {
    fn interfaces(&self) -> Result<Vec<HostInterface>> {
        let interfaces = datalink::interfaces();
        // pnet 在 getifaddrs 失败时返回空列表，而正常主机至少有回环接口
        if interfaces.is_empty() {
            return Err(PcapdError::Enumeration("no network interfaces reported by host".to_string()));
        }

        Ok(interfaces
            .into_iter()
            .map(|iface| HostInterface {
                hardware_addr: iface.mac.map(|mac| mac.to_string()).unwrap_or_default(),
                addresses: iface.ips.iter().map(|network| network.to_string()).collect(),
                flags: iface.flags as u32,
                name: iface.name,
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub up: bool,
    pub ethernet_addresses: Vec<String>,
    pub ipv4_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceList {
    pub success: bool,
    pub interfaces: Vec<InterfaceInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// 去掉前缀长度后解析地址。无法解析时返回 None。
///
/// IPv4 映射的 IPv6 地址(::ffff:a.b.c.d)有四字节形式，归为 IPv4。
pub fn classify_address(raw: &str) -> Option<(AddressFamily, &str)> {
    let address = raw.split('/').next().unwrap_or(raw);
    match address.parse::<IpAddr>().ok()? {
        IpAddr::V4(_) => Some((AddressFamily::V4, address)),
        IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => Some((AddressFamily::V4, address)),
        IpAddr::V6(_) => Some((AddressFamily::V6, address)),
    }
}

/// 接口目录
pub struct InterfaceCatalog {
    query: Box<dyn InterfaceQuery>,
}

impl InterfaceCatalog {
    pub fn new(query: Box<dyn InterfaceQuery>) -> Self {
        Self { query }
    }

    /// 列出接口。主机查询失败时返回 success = false 和空列表。
    pub fn list(&self, include_down: bool) -> InterfaceList {
        let host_interfaces = match self.query.interfaces() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("Interface query failed: {}", e);
                return InterfaceList {
                    success: false,
                    interfaces: Vec::new(),
                };
            }
        };

        let interfaces = host_interfaces
            .iter()
            .filter(|iface| include_down || iface.is_up())
            .map(describe)
            .collect();

        InterfaceList {
            success: true,
            interfaces,
        }
    }
}

impl Default for InterfaceCatalog {
    fn default() -> Self {
        Self::new(Box::new(PnetInterfaces))
    }
}

fn describe(iface: &HostInterface) -> InterfaceInfo {
    let mut info = InterfaceInfo {
        name: iface.name.clone(),
        up: iface.is_up(),
        ethernet_addresses: vec![iface.hardware_addr.clone()],
        ipv4_addresses: Vec::new(),
        ipv6_addresses: Vec::new(),
    };

    for raw in &iface.addresses {
        match classify_address(raw) {
            Some((AddressFamily::V4, address)) => {
                debug!("[4] [{}] {}: {}", iface.name, raw, address);
                info.ipv4_addresses.push(address.to_string());
            }
            Some((AddressFamily::V6, address)) => {
                debug!("[6] [{}] {}: {}", iface.name, raw, address);
                info.ipv6_addresses.push(address.to_string());
            }
            None => debug!("[{}] skipping unparsable address {:?}", iface.name, raw),
        }
    }

    info
}
