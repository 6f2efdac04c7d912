//! Capture descriptor line decoding.
//!
//! Same layering as the rest of the crate's decoders:
//! - `layout`: token positions and patterns (source of truth)
//! - `reader`: checked token access
//! - `parser`: record-level decoding
//! - `error`: typed reasons for rejected lines
//!
//! Decoding is pure. Callers that only care about "packet or nothing" use
//! [`parse_packet`]; [`parse_line`] keeps the reason for logging.

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

pub use error::LineError;
pub use parser::{PacketRecord, parse_line, parse_packet};
