//! Token positions of a capture descriptor line.
//!
//! A line looks like
//! `0.512 2 10.0.0.5 -> 52.1.2.3 UDP 1242 50000 -> 3478 Len=1200`.

pub const ARRIVAL_TIME_TOKEN: usize = 0;
pub const SOURCE_ADDR_TOKEN: usize = 2;
pub const DEST_ADDR_TOKEN: usize = 4;
pub const SIZE_TOKEN: usize = 6;
pub const SOURCE_PORT_TOKEN: usize = 7;
pub const DEST_PORT_TOKEN: usize = 9;

pub const MIN_TOKENS: usize = 10;

pub const ALLOWED_PROTOCOLS: [&str; 3] = ["UDP", "TCP", "SSL"];

pub const IPV4_PATTERN: &str = r"^\d{1,3}(\.\d{1,3}){3}";
pub const IPV6_PATTERN: &str = r"^([a-fA-F0-9:]+:+)+[a-fA-F0-9]+";
