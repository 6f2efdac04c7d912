//! Conversation identities and traffic direction.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Coarse conversation identity: one direction between two hosts.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddrPair {
    pub src: IpAddr,
    pub dst: IpAddr,
}

impl AddrPair {
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        Self { src, dst }
    }
}

impl fmt::Display for AddrPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Fine conversation identity: one direction between two endpoints.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl FlowKey {
    pub fn addr_pair(&self) -> AddrPair {
        AddrPair::new(self.src_ip, self.dst_ip)
    }

    pub fn src_endpoint(&self) -> String {
        format_endpoint(self.src_ip, self.src_port)
    }

    pub fn dst_endpoint(&self) -> String {
        format_endpoint(self.dst_ip, self.dst_port)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src_endpoint(), self.dst_endpoint())
    }
}

fn format_endpoint(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(addr) => format!("{}:{}", addr, port),
        IpAddr::V6(addr) => format!("[{}]:{}", addr, port),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outgoing => f.write_str("outgoing"),
            Direction::Incoming => f.write_str("incoming"),
        }
    }
}

/// Addresses that belong to the monitored host.
///
/// # Examples
/// ```
/// use callshark_core::{AddrPair, Direction, LocalAddrs};
///
/// let local = LocalAddrs::new(["10.0.0.5".parse().unwrap()]);
/// let pair = AddrPair::new("10.0.0.5".parse().unwrap(), "52.1.2.3".parse().unwrap());
/// assert_eq!(local.direction_of(&pair), Some(Direction::Outgoing));
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalAddrs {
    addrs: HashSet<IpAddr>,
}

impl LocalAddrs {
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.addrs.contains(addr)
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Classify a pair: locally sourced wins over locally destined.
    pub fn direction_of(&self, pair: &AddrPair) -> Option<Direction> {
        if self.contains(&pair.src) {
            Some(Direction::Outgoing)
        } else if self.contains(&pair.dst) {
            Some(Direction::Incoming)
        } else {
            None
        }
    }
}
