//! Transport endpoints advertised by agents

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// The transport family a gateway speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GatewayType {
    /// Local UDP multicast / broadcast
    Udp,
    /// Direct HTTP between agents
    Http,
    /// Store-and-forward HTTP relay polled by agents
    Www,
}

impl Display for GatewayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayType::Udp => f.write_str("udp"),
            GatewayType::Http => f.write_str("http"),
            GatewayType::Www => f.write_str("www"),
        }
    }
}

/// A network address an agent can be reached on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Which gateway serves this endpoint
    pub kind: GatewayType,
    /// Socket address of the endpoint
    pub addr: SocketAddr,
    /// Prefix length of the network the address lives on
    pub prefix_len: u8,
}

impl Endpoint {
    pub fn new(kind: GatewayType, addr: SocketAddr, prefix_len: u8) -> Self {
        Self {
            kind,
            addr,
            prefix_len,
        }
    }

    pub fn udp(addr: SocketAddr, prefix_len: u8) -> Self {
        Self::new(GatewayType::Udp, addr, prefix_len)
    }

    pub fn http(addr: SocketAddr) -> Self {
        let full = if addr.is_ipv4() { 32 } else { 128 };
        Self::new(GatewayType::Http, addr, full)
    }

    /// The network address as a 64-bit value
    ///
    /// IPv4 networks map onto the low 32 bits; IPv6 networks keep the upper
    /// 64 bits of the masked address (the routing prefix).
    pub fn network_bits(&self) -> u64 {
        match self.addr.ip() {
            IpAddr::V4(ip) => {
                let prefix = u32::from(self.prefix_len.min(32));
                let mask = if prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - prefix)
                };
                u64::from(u32::from(ip) & mask)
            }
            IpAddr::V6(ip) => {
                let prefix = u32::from(self.prefix_len.min(128));
                let mask = if prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - prefix)
                };
                ((u128::from(ip) & mask) >> 64) as u64
            }
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.kind, self.addr, self.prefix_len)
    }
}
