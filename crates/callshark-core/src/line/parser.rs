use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::error::LineError;
use super::layout;
use super::reader::LineReader;
use crate::flow::{AddrPair, FlowKey};

/// One packet as described by a capture line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// Total frame size in bytes.
    pub size: u64,
    /// Arrival time in seconds, as reported by the capture tool.
    pub arrival_time: f64,
}

impl PacketRecord {
    pub fn addr_pair(&self) -> AddrPair {
        AddrPair::new(self.src_ip, self.dst_ip)
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.src_ip,
            src_port: self.src_port,
            dst_ip: self.dst_ip,
            dst_port: self.dst_port,
        }
    }
}

/// Parse a capture descriptor line.
///
/// Returns `Ok(None)` when the line does not describe a TCP/UDP packet.
///
/// # Examples
/// ```
/// use callshark_core::parse_line;
///
/// let line = "0.25 7 10.0.0.5 -> 52.1.2.3 UDP 1242 50000 -> 3478 Len=1200";
/// let record = parse_line(line).unwrap().unwrap();
/// assert_eq!(record.size, 1242);
/// assert_eq!(record.dst_port, 3478);
/// ```
pub fn parse_line(line: &str) -> Result<Option<PacketRecord>, LineError> {
    let reader = LineReader::new(line);
    if !reader.has_allowed_protocol() {
        return Ok(None);
    }
    reader.require_len(layout::MIN_TOKENS)?;

    let arrival_time: f64 = reader.read_number(layout::ARRIVAL_TIME_TOKEN, "arrival time")?;
    if !arrival_time.is_finite() {
        return Err(LineError::InvalidNumber {
            field: "arrival time",
            token: reader.token(layout::ARRIVAL_TIME_TOKEN)?.to_string(),
        });
    }
    let src_ip = reader.read_address(layout::SOURCE_ADDR_TOKEN, "source")?;
    let dst_ip = reader.read_address(layout::DEST_ADDR_TOKEN, "destination")?;
    let src_port = reader.read_number(layout::SOURCE_PORT_TOKEN, "source port")?;
    let dst_port = reader.read_number(layout::DEST_PORT_TOKEN, "destination port")?;
    let size = reader.read_number(layout::SIZE_TOKEN, "size")?;

    Ok(Some(PacketRecord {
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        size,
        arrival_time,
    }))
}

/// Parse a line, folding every failure into `None`.
pub fn parse_packet(line: &str) -> Option<PacketRecord> {
    parse_line(line).ok().flatten()
}
